//! HTTP 中间件与提取器

pub mod auth;

pub use auth::AuthenticatedPrincipal;
