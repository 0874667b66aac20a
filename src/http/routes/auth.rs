//! 认证路由
//!
//! - POST /api/auth/login         - 邮箱 + 密码登录，返回令牌对
//! - POST /api/auth/refresh       - refresh token 轮换
//! - POST /api/auth/logout        - 吊销当前令牌（Bearer）
//! - POST /api/auth/token/verify  - 校验任意令牌
//! - GET  /api/auth/public-key    - 验签公钥（PEM）
//! - GET  /api/auth/protected     - 需要登录的示例接口

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::{Operation, OwnershipAuthorizer, TokenPair};
use crate::error::{Result, ServerError};
use crate::http::middleware::AuthenticatedPrincipal;
use crate::http::HttpServerState;

/// 创建认证路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/token/verify", post(verify_token))
        .route("/api/auth/public-key", get(public_key))
        .route("/api/auth/protected", get(protected))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct LogoutRequest {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    token: String,
}

fn token_pair_body(pair: TokenPair, message: &str) -> Json<Value> {
    Json(json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "token_type": pair.token_type,
        "expires_in": pair.expires_in,
        "refresh_expires_in": pair.refresh_expires_in,
        "message": message,
    }))
}

/// 请求体中的令牌出错时统一按 400 返回（5xx 除外）
fn body_token_error(err: ServerError) -> ServerError {
    match err {
        e if e.status_code().is_server_error() => e,
        ServerError::TokenExpired => ServerError::TokenExpired,
        _ => ServerError::TokenInvalid,
    }
}

/// 登录
async fn login(
    State(state): State<HttpServerState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload?;
    OwnershipAuthorizer::check(Operation::Login, None, None)?;

    let pair = state
        .auth_service
        .login(&request.email, &request.password)
        .await?;

    Ok(token_pair_body(pair, "Login successful"))
}

/// 刷新令牌
async fn refresh(
    State(state): State<HttpServerState>,
    payload: std::result::Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload?;
    OwnershipAuthorizer::check(Operation::Refresh, None, None)?;

    match state.auth_service.refresh(&request.refresh_token).await {
        Ok(pair) => Ok(token_pair_body(pair, "Token refreshed successfully")),
        Err(e) if e.status_code().is_server_error() => Err(e),
        Err(e) => {
            debug!("刷新失败: {}", e);
            Err(ServerError::BadRequest(
                "Invalid or expired refresh token".to_string(),
            ))
        }
    }
}

/// 登出（请求体可选，携带 refresh_token 时一并吊销）
async fn logout(
    State(state): State<HttpServerState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Bytes,
) -> Result<Json<Value>> {
    OwnershipAuthorizer::check(Operation::Logout, Some(&principal), None)?;

    let request: Option<LogoutRequest> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice(&body)?)
    };
    let refresh_token = request.and_then(|r| r.refresh_token);

    let ack = state
        .auth_service
        .logout(&principal.claims, refresh_token.as_deref())
        .await
        .map_err(|e| match e {
            ServerError::Forbidden => e,
            other => body_token_error(other),
        })?;

    info!("登出完成: user_id={}, revoked={}", ack.user_id, ack.revoked.len());
    Ok(Json(json!({ "message": "Successfully logged out" })))
}

/// 校验令牌
async fn verify_token(
    State(state): State<HttpServerState>,
    payload: std::result::Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload?;
    OwnershipAuthorizer::check(Operation::VerifyToken, None, None)?;

    let claims = state
        .auth_service
        .validate(&request.token)
        .await
        .map_err(body_token_error)?;
    let user_id = claims.user_id()?;

    Ok(Json(json!({
        "message": format!("Token valid, user_id: {}", user_id),
        "user_id": user_id,
    })))
}

/// 验签公钥
async fn public_key(State(state): State<HttpServerState>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/x-pem-file")],
        state.auth_service.codec().public_key_pem().to_string(),
    )
        .into_response()
}

/// 需要登录的示例接口
async fn protected(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Value>> {
    OwnershipAuthorizer::check(Operation::ViewProtected, Some(&principal), None)?;

    Ok(Json(json!({
        "message": format!("Hello, {}! This is a protected endpoint.", principal.email),
        "user_id": principal.id,
    })))
}
