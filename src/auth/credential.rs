use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::models::{Identity, UserRecord};
use crate::auth::password::burn_verify;
use crate::auth::user_store::{UserStore, UserStoreError};
use crate::error::{Result, ServerError};

/// 凭据校验器
///
/// 用户不存在、未激活、密码错误、存储返回错误，在调用方看来都是同一个 `None`；
/// 只有存储超时会以 `ServiceUnavailable` 单独上报。
pub struct CredentialVerifier {
    store: Arc<dyn UserStore>,
    timeout: Duration,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn UserStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 校验登录标识 + 密码
    pub async fn verify(&self, identifier: &str, secret: &str) -> Result<Option<Identity>> {
        let record = match self.lookup(identifier).await? {
            Some(record) => record,
            None => {
                // 不存在的用户同样做一次哈希比较，避免通过耗时探测账号
                let secret = secret.to_string();
                let _ = tokio::task::spawn_blocking(move || burn_verify(&secret)).await;
                return Ok(None);
            }
        };

        if !record.is_active {
            // 停用账号同样完成一次真实的哈希比较，耗时与密码错误一致
            let _ = self.store.check_secret(&record, secret).await;
            debug!("用户未激活: user_id={}", record.id);
            return Ok(None);
        }

        if !self.store.check_secret(&record, secret).await {
            debug!("密码不匹配: user_id={}", record.id);
            return Ok(None);
        }

        Ok(Some(Identity::from(&record)))
    }

    /// 带超时的用户查找，后端错误视为未找到
    async fn lookup(&self, identifier: &str) -> Result<Option<UserRecord>> {
        let lookup = self.store.find_active_user_by_identifier(identifier);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(UserStoreError::Backend(e))) => {
                warn!("用户存储查询失败，按校验失败处理: {}", e);
                Ok(None)
            }
            Err(_) => {
                warn!("⏱️ 用户存储查询超时 ({:?})", self.timeout);
                Err(ServerError::ServiceUnavailable(
                    "user store lookup timed out".to_string(),
                ))
            }
        }
    }
}
