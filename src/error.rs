use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::token_codec::TokenError;

/// 服务器错误类型
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    /// 凭据错误（不区分用户不存在 / 密码错误 / 账号停用）
    #[error("Invalid credentials")]
    AuthFailure,
    /// 令牌已过期
    #[error("Token expired")]
    TokenExpired,
    /// 令牌无效（签名错误或格式错误）
    #[error("Token invalid")]
    TokenInvalid,
    /// 令牌已吊销
    #[error("Token revoked")]
    TokenRevoked,
    /// 签名密钥不可用（启动期致命错误）
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),
    /// 已认证但不是资源所有者
    #[error("Forbidden")]
    Forbidden,
    /// 后端存储超时或不可用
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// 缺少或无法识别的认证信息
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// 错误请求
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 参数校验失败
    #[error("Validation error: {0}")]
    Validation(String),
    /// 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::AuthFailure
            | ServerError::TokenExpired
            | ServerError::TokenInvalid
            | ServerError::BadRequest(_)
            | ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::TokenRevoked | ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::KeyUnavailable(_)
            | ServerError::Configuration(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ServerError::TokenExpired,
            TokenError::InvalidSignature | TokenError::Malformed(_) => ServerError::TokenInvalid,
            TokenError::Signing(msg) => ServerError::Internal(msg),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<tokio::time::error::Elapsed> for ServerError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServerError::ServiceUnavailable(err.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            // 5xx 不向客户端暴露内部细节
            error!("请求处理失败: {}", self);
        }
        (status_code, Json(ErrorResponse::new(&self))).into_response()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 凭据错误
    AuthFailure = 1001,
    /// 权限不足
    Forbidden = 1002,
    /// 验证错误
    Validation = 1003,
    /// 未认证
    Unauthorized = 1004,
    /// 配置错误
    Configuration = 2003,
    /// 密钥不可用
    KeyUnavailable = 2005,
    /// 服务不可用
    ServiceUnavailable = 5000,
    /// 令牌过期
    TokenExpired = 5001,
    /// 无效令牌
    TokenInvalid = 5002,
    /// 令牌已吊销
    TokenRevoked = 5003,
    /// 错误请求
    BadRequest = 5004,
    /// 资源未找到
    NotFound = 5005,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::AuthFailure => ErrorCode::AuthFailure,
            ServerError::TokenExpired => ErrorCode::TokenExpired,
            ServerError::TokenInvalid => ErrorCode::TokenInvalid,
            ServerError::TokenRevoked => ErrorCode::TokenRevoked,
            ServerError::KeyUnavailable(_) => ErrorCode::KeyUnavailable,
            ServerError::Forbidden => ErrorCode::Forbidden,
            ServerError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 固定为 "error"
    pub status: String,
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        let message = if error.status_code().is_server_error() {
            match error {
                ServerError::ServiceUnavailable(_) => "Service unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            error.to_string()
        };

        Self {
            status: "error".to_string(),
            code: ErrorCode::from(error),
            message,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
