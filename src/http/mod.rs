//! HTTP 服务器模块 - 使用 Axum 提供认证 API
//!
//! 功能包括：
//! - 登录 / 刷新 / 登出
//! - 令牌校验与公钥分发
//! - 基于所有权的用户接口

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{build_router, AuthHttpServer, HttpServerState};
