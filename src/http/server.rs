//! HTTP 服务器 - 使用 Axum 提供认证服务

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http::routes;
use crate::service::AuthenticationService;

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub auth_service: Arc<AuthenticationService>,
}

/// 构建完整路由（测试中直接驱动）
pub fn build_router(state: HttpServerState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 认证 HTTP 服务器
pub struct AuthHttpServer {
    state: HttpServerState,
    bind_address: String,
}

impl AuthHttpServer {
    /// 创建新的 HTTP 服务器
    pub fn new(auth_service: Arc<AuthenticationService>, bind_address: impl Into<String>) -> Self {
        Self {
            state: HttpServerState { auth_service },
            bind_address: bind_address.into(),
        }
    }

    /// 启动 HTTP 服务器，收到 Ctrl-C 后优雅退出
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = build_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!("🌐 HTTP 认证服务启动在 {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP 认证服务已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("无法监听退出信号: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 收到退出信号，正在关闭...");
}
