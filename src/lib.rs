pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod http; // HTTP 认证 API
pub mod infra;
pub mod logging;
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::AuthServer;
