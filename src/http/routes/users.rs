//! 用户路由
//!
//! - GET /api/users/{user_id}           - 查询用户（需要登录）
//! - PUT /api/users/{user_id}/password  - 修改密码（本人或超级用户）

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{Operation, OwnershipAuthorizer};
use crate::error::Result;
use crate::http::middleware::AuthenticatedPrincipal;
use crate::http::HttpServerState;

/// 创建用户路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/users/{user_id}", get(get_user))
        .route("/api/users/{user_id}/password", put(change_password))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    password: String,
    password2: String,
}

async fn get_user(
    State(state): State<HttpServerState>,
    Path(user_id): Path<u64>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Value>> {
    OwnershipAuthorizer::check(Operation::RetrieveUser, Some(&principal), Some(user_id))?;

    let user = state.auth_service.get_user(user_id).await?;
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "username": user.username,
    })))
}

async fn change_password(
    State(state): State<HttpServerState>,
    Path(user_id): Path<u64>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    payload: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload?;
    state
        .auth_service
        .change_password(&principal, user_id, &request.password, &request.password2)
        .await?;

    Ok(Json(json!({ "message": "Password updated successfully" })))
}
