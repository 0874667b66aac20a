// 业务服务层模块
pub mod auth_service;

pub use auth_service::{AuthServiceConfig, AuthenticationService};
