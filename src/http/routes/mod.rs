//! HTTP 路由模块
//!
//! 路由结构：
//! - `/api/auth/*`  - 登录、刷新、登出、令牌校验、公钥
//! - `/api/users/*` - 用户查询与密码修改（需要 Bearer 认证）
//! - `/health`、`/metrics` - 运维端点

pub mod auth;
pub mod system;
pub mod users;

use crate::http::HttpServerState;
use axum::Router;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .merge(system::create_route()) // /health, /metrics
        .merge(auth::create_route()) // /api/auth/*
        .merge(users::create_route()) // /api/users/*
}
