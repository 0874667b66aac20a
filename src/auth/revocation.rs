//! 令牌吊销列表
//!
//! 记录被吊销的 jti / 令牌族 ID 及其过期时间。过期后的条目可以清理，
//! 因为过期令牌在验签阶段就会被拒绝。

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::infra::metrics;

/// 吊销列表存储
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// 吊销 ID，返回是否为首次吊销（重复调用效果相同）
    async fn revoke(&self, id: &str, expires_at: i64) -> Result<bool>;

    /// 是否已吊销
    async fn is_revoked(&self, id: &str) -> Result<bool>;

    /// 清理 expires_at < now 的条目，返回清理数量
    async fn prune(&self, now: i64) -> Result<usize>;

    /// 当前条目数
    async fn len(&self) -> Result<usize>;
}

/// 内存吊销列表
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, i64>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, id: &str, expires_at: i64) -> Result<bool> {
        let inserted = match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        };
        debug!("吊销: id={}, expires_at={}, new={}", id, expires_at, inserted);
        Ok(inserted)
    }

    async fn is_revoked(&self, id: &str) -> Result<bool> {
        Ok(self.entries.contains_key(id))
    }

    async fn prune(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        self.entries.retain(|_, expires_at| {
            let keep = *expires_at >= now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

/// Sled 持久化吊销列表（进程重启后仍然有效）
pub struct SledRevocationStore {
    db: sled::Db,
}

impl SledRevocationStore {
    /// 打开（或创建）吊销列表数据库
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ServerError::Internal(format!("打开吊销列表数据库失败: {}", e)))?;

        info!("已打开吊销列表数据库: {}", path);

        Ok(Self { db })
    }

    fn decode_expiry(value: &[u8]) -> Option<i64> {
        let bytes: [u8; 8] = value.try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }
}

#[async_trait]
impl RevocationStore for SledRevocationStore {
    async fn revoke(&self, id: &str, expires_at: i64) -> Result<bool> {
        let value = expires_at.to_be_bytes();
        let inserted = self
            .db
            .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(&value[..]))
            .map_err(|e| ServerError::Internal(format!("写入吊销列表失败: {}", e)))?
            .is_ok();

        if inserted {
            self.db
                .flush_async()
                .await
                .map_err(|e| ServerError::Internal(format!("刷新吊销列表失败: {}", e)))?;
        }

        debug!("吊销(sled): id={}, expires_at={}, new={}", id, expires_at, inserted);
        Ok(inserted)
    }

    async fn is_revoked(&self, id: &str) -> Result<bool> {
        self.db
            .contains_key(id.as_bytes())
            .map_err(|e| ServerError::Internal(format!("读取吊销列表失败: {}", e)))
    }

    async fn prune(&self, now: i64) -> Result<usize> {
        let mut keys_to_remove = Vec::new();

        for result in self.db.iter() {
            let (key, value) = result
                .map_err(|e| ServerError::Internal(format!("遍历吊销列表失败: {}", e)))?;

            match Self::decode_expiry(&value) {
                Some(expires_at) if expires_at >= now => {}
                Some(_) => keys_to_remove.push(key),
                None => {
                    warn!("吊销列表中存在无法解析的条目，已删除");
                    keys_to_remove.push(key);
                }
            }
        }

        let mut removed = 0;
        for key in keys_to_remove {
            if self
                .db
                .remove(&key)
                .map_err(|e| ServerError::Internal(format!("删除吊销条目失败: {}", e)))?
                .is_some()
            {
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.db.len())
    }
}

/// 启动定期清理任务
pub fn spawn_prune_task(store: Arc<dyn RevocationStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            match store.prune(now).await {
                Ok(removed) => {
                    metrics::record_revocations_pruned(removed);
                    if removed > 0 {
                        info!("🧹 清理过期吊销条目: {}", removed);
                    }
                    if let Ok(size) = store.len().await {
                        metrics::record_revocation_list_size(size);
                    }
                }
                Err(e) => warn!("清理吊销列表失败: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise_store(store: &dyn RevocationStore) {
        assert!(!store.is_revoked("jti-1").await.unwrap());

        assert!(store.revoke("jti-1", 100).await.unwrap());
        assert!(store.is_revoked("jti-1").await.unwrap());

        // 重复吊销：效果相同
        assert!(!store.revoke("jti-1", 100).await.unwrap());
        assert!(store.is_revoked("jti-1").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);

        store.revoke("jti-2", 200).await.unwrap();
        store.revoke("jti-3", 300).await.unwrap();

        // 只清理 expires_at < now
        assert_eq!(store.prune(200).await.unwrap(), 1);
        assert!(!store.is_revoked("jti-1").await.unwrap());
        assert!(store.is_revoked("jti-2").await.unwrap());
        assert!(store.is_revoked("jti-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryRevocationStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sled_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRevocationStore::open(temp_dir.path().to_str().unwrap()).unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("revocations");
        let path = path.to_str().unwrap();

        {
            let store = SledRevocationStore::open(path).unwrap();
            store.revoke("jti-persisted", i64::MAX).await.unwrap();
        }

        let store = SledRevocationStore::open(path).unwrap();
        assert!(store.is_revoked("jti-persisted").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_revoke_single_winner() {
        let store = Arc::new(MemoryRevocationStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.revoke("contested", 100).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
