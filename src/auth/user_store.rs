//! 用户存储接口
//!
//! 用户记录的增删改查不属于认证核心，这里只定义认证所需的窄接口，
//! 并提供一个基于 DashMap 的内存实现（可从 TOML 种子文件加载）。

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::auth::models::{normalize_email, UserRecord};
use crate::auth::password::{hash_password_with_cost, verify_password, PASSWORD_COST};
use crate::error::ServerError;

/// 用户存储错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum UserStoreError {
    #[error("user store backend error: {0}")]
    Backend(String),
}

/// 用户存储（外部协作方）
#[async_trait]
pub trait UserStore: Send + Sync {
    /// 按登录标识（邮箱）查找活跃用户，不存在返回 None
    async fn find_active_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<UserRecord>, UserStoreError>;

    /// 按用户 ID 查找活跃用户
    async fn find_active_user_by_id(&self, id: u64) -> Result<Option<UserRecord>, UserStoreError>;

    /// 校验密码（加盐哈希比较）
    async fn check_secret(&self, record: &UserRecord, secret: &str) -> bool;

    /// 设置新密码，用户不存在返回 false
    async fn set_secret(&self, id: u64, secret: &str) -> Result<bool, UserStoreError>;
}

/// 种子文件格式
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// 内存用户存储
pub struct MemoryUserStore {
    users: DashMap<u64, UserRecord>,
    /// 规范化邮箱 -> 用户 ID
    email_index: DashMap<String, u64>,
    hash_cost: u32,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::with_hash_cost(PASSWORD_COST)
    }

    /// 指定 bcrypt 成本（测试中使用较低成本）
    pub fn with_hash_cost(hash_cost: u32) -> Self {
        Self {
            users: DashMap::new(),
            email_index: DashMap::new(),
            hash_cost,
        }
    }

    /// 从 TOML 种子文件加载
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ServerError::Configuration(format!("无法读取用户种子文件 {:?}: {}", path, e))
        })?;
        let seed: SeedFile = toml::from_str(&content).map_err(|e| {
            ServerError::Configuration(format!("用户种子文件格式错误 {:?}: {}", path, e))
        })?;

        let store = Self::new();
        for user in seed.users {
            store.insert(user)?;
        }

        info!("📄 已从 {:?} 加载 {} 个用户", path, store.len());
        Ok(store)
    }

    /// 插入用户记录（邮箱唯一）
    pub fn insert(&self, mut record: UserRecord) -> Result<(), ServerError> {
        record.email = normalize_email(&record.email);

        if let Some(existing) = self.email_index.get(&record.email) {
            if *existing != record.id {
                return Err(ServerError::Validation(format!(
                    "邮箱已被使用: {}",
                    record.email
                )));
            }
        }

        self.email_index.insert(record.email.clone(), record.id);
        self.users.insert(record.id, record);
        Ok(())
    }

    /// 创建用户（明文密码在此处哈希）
    pub fn create_user(
        &self,
        id: u64,
        email: &str,
        username: &str,
        password: &str,
        is_superuser: bool,
    ) -> Result<UserRecord, ServerError> {
        let record = UserRecord {
            id,
            email: normalize_email(email),
            username: username.to_string(),
            password_hash: hash_password_with_cost(password, self.hash_cost)?,
            is_active: true,
            is_superuser,
        };
        self.insert(record.clone())?;
        Ok(record)
    }

    /// 停用用户
    pub fn deactivate(&self, id: u64) -> bool {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_active_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<UserRecord>, UserStoreError> {
        let email = normalize_email(identifier);
        let user = self
            .email_index
            .get(&email)
            .and_then(|id| self.users.get(&*id).map(|u| u.clone()))
            .filter(|u| u.is_active);
        Ok(user)
    }

    async fn find_active_user_by_id(&self, id: u64) -> Result<Option<UserRecord>, UserStoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()).filter(|u| u.is_active))
    }

    async fn check_secret(&self, record: &UserRecord, secret: &str) -> bool {
        let secret = secret.to_string();
        let hash = record.password_hash.clone();
        match tokio::task::spawn_blocking(move || verify_password(&secret, &hash)).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                warn!("用户 {} 的密码哈希无法校验: {}", record.id, e);
                false
            }
            Err(e) => {
                warn!("密码校验任务失败: {}", e);
                false
            }
        }
    }

    async fn set_secret(&self, id: u64, secret: &str) -> Result<bool, UserStoreError> {
        let secret = secret.to_string();
        let cost = self.hash_cost;
        let hash = tokio::task::spawn_blocking(move || hash_password_with_cost(&secret, cost))
            .await
            .map_err(|e| UserStoreError::Backend(e.to_string()))?
            .map_err(|e| UserStoreError::Backend(e.to_string()))?;

        match self.users.get_mut(&id) {
            Some(mut user) if user.is_active => {
                user.password_hash = hash;
                debug!("用户 {} 密码已更新", id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store() -> MemoryUserStore {
        let store = MemoryUserStore::with_hash_cost(4);
        store
            .create_user(1, "Alice@X.com", "alice", "correct-horse", false)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let store = store();
        let user = store
            .find_active_user_by_identifier("  alice@x.COM")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, 1);
        assert!(store.check_secret(&user, "correct-horse").await);
        assert!(!store.check_secret(&user, "wrong").await);
    }

    #[tokio::test]
    async fn test_inactive_user_hidden() {
        let store = store();
        assert!(store.deactivate(1));
        assert!(store
            .find_active_user_by_identifier("alice@x.com")
            .await
            .unwrap()
            .is_none());
        assert!(store.find_active_user_by_id(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = store();
        let result = store.create_user(2, "alice@x.com", "alice2", "whatever1", false);
        assert!(matches!(result, Err(ServerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_set_secret() {
        let store = store();
        assert!(store.set_secret(1, "new-password").await.unwrap());
        let user = store.find_active_user_by_id(1).await.unwrap().unwrap();
        assert!(store.check_secret(&user, "new-password").await);
        assert!(!store.check_secret(&user, "correct-horse").await);
        assert!(!store.set_secret(99, "new-password").await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_file() {
        let hash = hash_password_with_cost("seeded-pass", 4).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[users]]
id = 10
email = "Root@Example.com"
username = "root"
password_hash = "{}"
is_superuser = true

[[users]]
id = 11
email = "bob@example.com"
password_hash = "{}"
is_active = false
"#,
            hash, hash
        )
        .unwrap();

        let store = MemoryUserStore::from_seed_file(file.path()).unwrap();
        assert_eq!(store.len(), 2);

        let root = store
            .find_active_user_by_identifier("root@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(root.is_superuser);
        assert!(store.check_secret(&root, "seeded-pass").await);
        assert!(store.find_active_user_by_id(11).await.unwrap().is_none());
    }
}
