//! Bearer 认证提取器
//!
//! 处理器参数中声明 `AuthenticatedPrincipal` 即要求请求携带有效的 access token。

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::debug;

use crate::auth::Principal;
use crate::error::ServerError;
use crate::http::HttpServerState;

/// 已认证的请求主体
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

impl FromRequestParts<HttpServerState> for AuthenticatedPrincipal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".to_string()))?;

        match state.auth_service.authenticate(token).await {
            Ok(principal) => Ok(Self(principal)),
            // 存储超时、内部错误保持原状，其余一律 401
            Err(e) if e.status_code().is_server_error() => Err(e),
            Err(e) => {
                debug!("🔐 Bearer 认证失败: {}", e);
                Err(ServerError::Unauthorized(
                    "invalid or expired bearer token".to_string(),
                ))
            }
        }
    }
}

/// 从 Authorization 头中取出 Bearer 令牌
fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/auth/protected");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc.def.ghi"))), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&parts(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic dXNlcjpwYXNz"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer"))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
