use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ServerError};

/// 令牌类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// 会话令牌 Claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// JWT 标准字段 - 签发者
    pub iss: String,
    /// JWT 标准字段 - 受众
    pub aud: String,
    /// JWT 标准字段 - 主题 (用户ID)
    pub sub: String,
    /// 令牌类型 (access / refresh)
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// JWT 标准字段 - 签发时间
    pub iat: i64,
    /// JWT 标准字段 - 过期时间 (Unix timestamp)
    pub exp: i64,
    /// JWT 标准字段 - JWT ID (用于吊销)
    pub jti: String,
    /// 令牌族 ID：登录时生成，刷新轮换时沿用
    pub fam: String,
}

impl SessionClaims {
    /// 解析主题中的用户 ID
    pub fn user_id(&self) -> Result<u64> {
        self.sub.parse::<u64>().map_err(|_| ServerError::TokenInvalid)
    }

    /// 要求令牌为指定类型
    pub fn expect_kind(&self, kind: TokenKind) -> Result<()> {
        if self.kind != kind {
            tracing::warn!(
                "令牌类型不匹配: expected={}, actual={}, jti={}",
                kind,
                self.kind,
                self.jti
            );
            return Err(ServerError::TokenInvalid);
        }
        Ok(())
    }
}

/// 签发结果：令牌字符串 + 对应 claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// 登录 / 刷新响应中的令牌对
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// 固定为 "Bearer"
    pub token_type: String,
    /// access token 有效期（秒）
    pub expires_in: i64,
    /// refresh token 有效期（秒）
    pub refresh_expires_in: i64,
}

/// 用户记录（由外部用户存储提供）
#[derive(Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub username: String,
    /// bcrypt 哈希，不保存明文
    pub password_hash: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("is_active", &self.is_active)
            .field("is_superuser", &self.is_superuser)
            .finish_non_exhaustive()
    }
}

/// 凭据校验通过后的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub email: String,
    pub is_superuser: bool,
}

impl From<&UserRecord> for Identity {
    fn from(record: &UserRecord) -> Self {
        Self {
            user_id: record.id,
            email: record.email.clone(),
            is_superuser: record.is_superuser,
        }
    }
}

/// 已认证的请求主体
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: u64,
    pub email: String,
    pub is_superuser: bool,
    /// 本次请求出示的令牌 claims（登出时据此吊销）
    pub claims: SessionClaims,
}

/// 登出确认
#[derive(Debug, Clone, Serialize)]
pub struct LogoutAck {
    pub user_id: u64,
    /// 被吊销的 jti 列表
    pub revoked: Vec<String>,
    /// 被吊销的令牌族
    pub family: String,
}

/// 规范化邮箱（去空白 + 小写）
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(kind: TokenKind) -> SessionClaims {
        SessionClaims {
            iss: "authgate".to_string(),
            aud: "authgate-client".to_string(),
            sub: "42".to_string(),
            kind,
            iat: 0,
            exp: 60,
            jti: "jti-1".to_string(),
            fam: "fam-1".to_string(),
        }
    }

    #[test]
    fn test_kind_serialized_as_type_claim() {
        let value = serde_json::to_value(claims(TokenKind::Refresh)).unwrap();
        assert_eq!(value["type"], "refresh");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_expect_kind() {
        let c = claims(TokenKind::Access);
        assert!(c.expect_kind(TokenKind::Access).is_ok());
        assert!(matches!(
            c.expect_kind(TokenKind::Refresh),
            Err(ServerError::TokenInvalid)
        ));
        assert_eq!(c.user_id().unwrap(), 42);
    }

    #[test]
    fn test_user_record_debug_hides_hash() {
        let record = UserRecord {
            id: 1,
            email: "alice@x.com".to_string(),
            username: "alice".to_string(),
            password_hash: "$2b$04$secrethash".to_string(),
            is_active: true,
            is_superuser: false,
        };
        assert!(!format!("{:?}", record).contains("secrethash"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@X.COM "), "alice@x.com");
    }
}
