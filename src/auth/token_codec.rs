use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::key_provider::Keypair;
use crate::auth::models::{IssuedToken, SessionClaims, TokenKind};

/// 令牌编解码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// 签名不匹配（篡改、伪造或其他密钥签发）
    #[error("invalid token signature")]
    InvalidSignature,
    /// now >= exp
    #[error("token expired")]
    Expired,
    /// 结构无法解析或 iss/aud 不符
    #[error("malformed token: {0}")]
    Malformed(String),
    /// 签发失败
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// 会话令牌签发和验证
///
/// 只负责签名与过期判断，不查询吊销列表。
pub struct TokenCodec {
    keypair: Arc<Keypair>,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    pub fn new(keypair: Arc<Keypair>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keypair,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// 可公开分发的验签公钥
    pub fn public_key_pem(&self) -> &str {
        self.keypair.public_key_pem()
    }

    /// 签发单个令牌（新 jti、新令牌族）
    pub fn issue(&self, subject: u64, kind: TokenKind, ttl: i64) -> Result<String, TokenError> {
        let family = Uuid::new_v4().to_string();
        self.issue_in_family(subject, kind, ttl, &family, Utc::now().timestamp())
            .map(|issued| issued.token)
    }

    /// 在指定令牌族内签发
    pub fn issue_in_family(
        &self,
        subject: u64,
        kind: TokenKind,
        ttl: i64,
        family: &str,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        if ttl <= 0 {
            return Err(TokenError::Signing(format!("ttl 必须为正数: {}", ttl)));
        }

        let exp = now
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Signing(format!("过期时间溢出: now={}, ttl={}", now, ttl)))?;

        let claims = SessionClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            kind,
            iat: now,
            exp,
            jti: Uuid::new_v4().to_string(),
            fam: family.to_string(),
        };

        let header = Header::new(self.keypair.algorithm());
        let token = encode(&header, &claims, self.keypair.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// 验证令牌
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// 以给定时间验证令牌（now >= exp 即视为过期）
    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, TokenError> {
        let token_data = decode::<SessionClaims>(token, self.keypair.decoding_key(), &self.validation())
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                other => TokenError::Malformed(format!("{:?}", other)),
            })?;

        let claims = token_data.claims;
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.keypair.algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // 过期由 verify_at 严格判断，库自带的判断带 leeway 且 exp == now 时放行
        validation.validate_exp = false;
        validation.leeway = 0;
        validation
    }
}
