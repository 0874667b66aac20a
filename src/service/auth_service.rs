use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::authorizer::{Operation, OwnershipAuthorizer};
use crate::auth::credential::CredentialVerifier;
use crate::auth::models::{LogoutAck, Principal, SessionClaims, TokenKind, TokenPair, UserRecord};
use crate::auth::password::validate_new_password;
use crate::auth::revocation::RevocationStore;
use crate::auth::token_codec::TokenCodec;
use crate::auth::user_store::UserStore;
use crate::error::{Result, ServerError};
use crate::infra::metrics;

/// 认证服务配置
#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    /// access token 有效期（秒）
    pub access_token_ttl: i64,
    /// refresh token 有效期（秒）
    pub refresh_token_ttl: i64,
    /// 用户存储查询超时
    pub user_store_timeout: Duration,
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: 86400,
            refresh_token_ttl: 86400,
            user_store_timeout: Duration::from_millis(2000),
        }
    }
}

/// 认证服务：登录、刷新、登出、Bearer 认证
pub struct AuthenticationService {
    credentials: CredentialVerifier,
    users: Arc<dyn UserStore>,
    codec: Arc<TokenCodec>,
    revocations: Arc<dyn RevocationStore>,
    config: AuthServiceConfig,
}

impl AuthenticationService {
    pub fn new(
        users: Arc<dyn UserStore>,
        codec: Arc<TokenCodec>,
        revocations: Arc<dyn RevocationStore>,
        config: AuthServiceConfig,
    ) -> Self {
        Self {
            credentials: CredentialVerifier::new(users.clone(), config.user_store_timeout),
            users,
            codec,
            revocations,
            config,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// 用户登录
    ///
    /// 状态流转：Received → CredentialsChecked → TokensIssued | Rejected
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<TokenPair> {
        let started = Instant::now();
        debug!("登录: Received");

        let identity = match self.credentials.verify(identifier, secret).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("登录: 凭据校验中断: {}", e);
                metrics::record_login("unavailable", started.elapsed().as_secs_f64());
                return Err(e);
            }
        };
        debug!("登录: CredentialsChecked");

        let Some(identity) = identity else {
            info!("❌ 登录: Rejected");
            metrics::record_login("rejected", started.elapsed().as_secs_f64());
            return Err(ServerError::AuthFailure);
        };

        let family = Uuid::new_v4().to_string();
        let pair = self.issue_pair(identity.user_id, &family, Utc::now().timestamp());
        match &pair {
            Ok(_) => {
                info!("✅ 登录: TokensIssued, user_id={}", identity.user_id);
                metrics::record_login("success", started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!("登录: 签发令牌失败, user_id={}: {}", identity.user_id, e);
                metrics::record_login("error", started.elapsed().as_secs_f64());
            }
        }
        pair
    }

    /// 使用 refresh token 换取新的令牌对（旧 refresh token 随即失效）
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let result = self.rotate(refresh_token).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(ServerError::TokenRevoked) => "reused",
            Err(ServerError::ServiceUnavailable(_)) => "unavailable",
            Err(_) => "rejected",
        };
        metrics::record_refresh(outcome);
        result
    }

    async fn rotate(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.codec.verify(refresh_token)?;
        claims.expect_kind(TokenKind::Refresh)?;
        let user_id = claims.user_id()?;

        if self.revocations.is_revoked(&claims.fam).await? {
            debug!("刷新: 令牌族已吊销, fam={}", claims.fam);
            return Err(ServerError::TokenRevoked);
        }

        // 先确认用户仍然有效；存储超时在这里返回，refresh token 不会被消耗
        match self.find_user(user_id).await? {
            Some(user) if user.is_active => {}
            _ => {
                info!("刷新: 用户不存在或已停用, user_id={}", user_id);
                return Err(ServerError::AuthFailure);
            }
        }

        // 吊销成功的一方才能继续，保证同一 refresh token 只能兑换一次
        let now = Utc::now().timestamp();
        if !self.revocations.revoke(&claims.jti, claims.exp).await? {
            warn!(
                "⚠️ refresh token 重复使用，吊销整个令牌族: user_id={}, fam={}",
                user_id, claims.fam
            );
            self.revocations
                .revoke(&claims.fam, self.family_expiry(now))
                .await?;
            metrics::record_revocation("reuse", 1);
            return Err(ServerError::TokenRevoked);
        }
        metrics::record_revocation("rotation", 1);

        let pair = self.issue_pair(user_id, &claims.fam, now)?;
        info!("🔄 refresh token 已轮换: user_id={}, old_jti={}", user_id, claims.jti);
        Ok(pair)
    }

    /// 登出：吊销本次出示的令牌及其令牌族
    ///
    /// 若同时提交了 refresh token，它必须属于同一用户，否则 `Forbidden`。
    pub async fn logout(
        &self,
        claims: &SessionClaims,
        refresh_token: Option<&str>,
    ) -> Result<LogoutAck> {
        let user_id = claims.user_id()?;

        // 先校验附带的 refresh token，避免部分吊销
        let extra = match refresh_token {
            Some(token) => {
                let extra = self.codec.verify(token)?;
                extra.expect_kind(TokenKind::Refresh)?;
                if extra.user_id()? != user_id {
                    warn!(
                        "登出: refresh token 不属于当前用户, user_id={}, jti={}",
                        user_id, extra.jti
                    );
                    return Err(ServerError::Forbidden);
                }
                Some(extra)
            }
            None => None,
        };

        let now = Utc::now().timestamp();
        let family_expiry = self.family_expiry(now);
        let mut revoked = Vec::new();
        let mut newly = 0;

        if self.revocations.revoke(&claims.jti, claims.exp).await? {
            newly += 1;
        }
        revoked.push(claims.jti.clone());
        if self.revocations.revoke(&claims.fam, family_expiry).await? {
            newly += 1;
        }

        if let Some(extra) = extra {
            if self.revocations.revoke(&extra.jti, extra.exp).await? {
                newly += 1;
            }
            if extra.fam != claims.fam
                && self.revocations.revoke(&extra.fam, family_expiry).await?
            {
                newly += 1;
            }
            revoked.push(extra.jti);
        }

        metrics::record_revocation("logout", newly);
        info!("👋 用户登出: user_id={}, fam={}", user_id, claims.fam);

        Ok(LogoutAck {
            user_id,
            revoked,
            family: claims.fam.clone(),
        })
    }

    /// Bearer 认证：要求 access token、未吊销、用户仍然有效
    pub async fn authenticate(&self, bearer: &str) -> Result<Principal> {
        let claims = self.codec.verify(bearer)?;
        claims.expect_kind(TokenKind::Access)?;
        self.ensure_not_revoked(&claims).await?;

        let user_id = claims.user_id()?;
        let user = self.find_user(user_id).await?.filter(|u| u.is_active).ok_or_else(|| {
            debug!("认证: 用户不存在或已停用, user_id={}", user_id);
            ServerError::Unauthorized("unknown principal".to_string())
        })?;

        Ok(Principal {
            id: user.id,
            email: user.email,
            is_superuser: user.is_superuser,
            claims,
        })
    }

    /// 校验任意类型令牌（签名 + 过期 + 吊销）
    pub async fn validate(&self, token: &str) -> Result<SessionClaims> {
        let claims = self.codec.verify(token)?;
        self.ensure_not_revoked(&claims).await?;
        claims.user_id()?;
        Ok(claims)
    }

    /// 查询活跃用户
    pub async fn get_user(&self, user_id: u64) -> Result<UserRecord> {
        self.find_user(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ServerError::NotFound(format!("user {}", user_id)))
    }

    /// 修改密码（所有者或超级用户）
    pub async fn change_password(
        &self,
        principal: &Principal,
        user_id: u64,
        password: &str,
        confirmation: &str,
    ) -> Result<()> {
        OwnershipAuthorizer::check(Operation::ChangePassword, Some(principal), Some(user_id))?;
        validate_new_password(password, confirmation)?;

        let update = self.users.set_secret(user_id, password);
        let updated = tokio::time::timeout(self.config.user_store_timeout, update)
            .await?
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        if !updated {
            return Err(ServerError::NotFound(format!("user {}", user_id)));
        }

        info!("🔑 密码已修改: user_id={}, by={}", user_id, principal.id);
        Ok(())
    }

    fn issue_pair(&self, user_id: u64, family: &str, now: i64) -> Result<TokenPair> {
        let access = self.codec.issue_in_family(
            user_id,
            TokenKind::Access,
            self.config.access_token_ttl,
            family,
            now,
        )?;
        let refresh = self.codec.issue_in_family(
            user_id,
            TokenKind::Refresh,
            self.config.refresh_token_ttl,
            family,
            now,
        )?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl,
            refresh_expires_in: self.config.refresh_token_ttl,
        })
    }

    async fn ensure_not_revoked(&self, claims: &SessionClaims) -> Result<()> {
        if self.revocations.is_revoked(&claims.jti).await?
            || self.revocations.is_revoked(&claims.fam).await?
        {
            debug!("令牌已吊销: jti={}", claims.jti);
            return Err(ServerError::TokenRevoked);
        }
        Ok(())
    }

    /// 按 ID 查找用户；后端错误按未找到处理，超时单独上报
    async fn find_user(&self, user_id: u64) -> Result<Option<UserRecord>> {
        let lookup = self.users.find_active_user_by_id(user_id);
        match tokio::time::timeout(self.config.user_store_timeout, lookup).await? {
            Ok(user) => Ok(user),
            Err(e) => {
                warn!("用户存储查询失败: user_id={}, {}", user_id, e);
                Ok(None)
            }
        }
    }

    /// 令牌族条目的保留期限：族内任何令牌都不会晚于此时过期
    fn family_expiry(&self, now: i64) -> i64 {
        now.saturating_add(
            self.config
                .access_token_ttl
                .max(self.config.refresh_token_ttl),
        )
    }
}
