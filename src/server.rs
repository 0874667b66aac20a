use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{
    spawn_prune_task, KeyProvider, MemoryRevocationStore, MemoryUserStore, RevocationStore,
    SledRevocationStore, TokenCodec, UserStore,
};
use crate::config::{RevocationBackend, ServerConfig};
use crate::error::{Result, ServerError};
use crate::http::AuthHttpServer;
use crate::infra::metrics;
use crate::service::AuthenticationService;

/// 认证服务器：负责组装各组件并启动 HTTP 服务
pub struct AuthServer {
    config: ServerConfig,
    auth_service: Arc<AuthenticationService>,
    revocations: Arc<dyn RevocationStore>,
}

impl AuthServer {
    /// 创建服务器
    ///
    /// 密钥不可用（`KeyUnavailable`）或配置错误会在这里返回，调用方应直接退出，
    /// 此时还没有绑定任何端口。
    pub async fn new(config: ServerConfig) -> Result<Self> {
        // 1. 签名密钥
        let key_provider = KeyProvider::new(
            config.auth.private_key_path.clone(),
            config.auth.public_key_path.clone(),
            &config.auth.algorithm,
        )?;
        // 首次启动时可能需要等待其他进程释放锁文件
        let keypair = tokio::task::spawn_blocking(move || key_provider.ensure_keys())
            .await
            .map_err(|e| ServerError::KeyUnavailable(e.to_string()))??;
        let keypair = Arc::new(keypair);
        info!("🔑 签名密钥已就绪: {:?}", keypair);

        // 2. 用户存储
        let users: Arc<dyn UserStore> = match &config.users.seed_file {
            Some(path) => Arc::new(MemoryUserStore::from_seed_file(path)?),
            None => {
                warn!("⚠️ 未配置 users.seed_file，用户表为空，所有登录都会失败");
                Arc::new(MemoryUserStore::new())
            }
        };

        // 3. 吊销列表
        let revocations: Arc<dyn RevocationStore> = match config.revocation.backend {
            RevocationBackend::Memory => Arc::new(MemoryRevocationStore::new()),
            RevocationBackend::Sled => Arc::new(SledRevocationStore::open(&config.revocation.path)?),
        };

        // 4. 认证服务
        let codec = Arc::new(TokenCodec::new(
            keypair,
            config.auth.issuer.clone(),
            config.auth.audience.clone(),
        ));
        let auth_service = Arc::new(AuthenticationService::new(
            users,
            codec,
            revocations.clone(),
            config.auth.service_config(),
        ));

        Ok(Self {
            config,
            auth_service,
            revocations,
        })
    }

    pub fn auth_service(&self) -> &Arc<AuthenticationService> {
        &self.auth_service
    }

    /// 运行服务器，直到收到退出信号
    pub async fn run(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Err(e) = metrics::init() {
            warn!("Prometheus 指标初始化失败: {}", e);
        }

        let prune_task = spawn_prune_task(
            self.revocations.clone(),
            self.config.revocation.prune_interval(),
        );

        let server = AuthHttpServer::new(self.auth_service.clone(), self.config.bind_address());
        let result = server.start().await;

        prune_task.abort();
        result
    }
}
