//! 认证 HTTP 流程集成测试

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use authgate::auth::{
    KeyProvider, MemoryRevocationStore, MemoryUserStore, TokenCodec, UserRecord, UserStore,
    UserStoreError,
};
use authgate::http::{build_router, HttpServerState};
use authgate::service::{AuthServiceConfig, AuthenticationService};

struct TestApp {
    router: Router,
    _keys: TempDir,
}

fn codec(dir: &TempDir) -> Arc<TokenCodec> {
    let provider = KeyProvider::new(
        dir.path().join("private_key.pem"),
        dir.path().join("public_key.pem"),
        "EdDSA",
    )
    .unwrap();
    let keypair = Arc::new(provider.ensure_keys().unwrap());
    Arc::new(TokenCodec::new(keypair, "authgate", "authgate-client"))
}

fn app_with_store(users: Arc<dyn UserStore>, timeout: Duration) -> TestApp {
    let keys = TempDir::new().unwrap();
    let service = AuthenticationService::new(
        users,
        codec(&keys),
        Arc::new(MemoryRevocationStore::new()),
        AuthServiceConfig {
            access_token_ttl: 300,
            refresh_token_ttl: 600,
            user_store_timeout: timeout,
        },
    );

    TestApp {
        router: build_router(HttpServerState {
            auth_service: Arc::new(service),
        }),
        _keys: keys,
    }
}

fn app() -> TestApp {
    let users = MemoryUserStore::with_hash_cost(4);
    users
        .create_user(1, "alice@x.com", "alice", "pw-alice-123", false)
        .unwrap();
    users
        .create_user(2, "bob@x.com", "bob", "pw-bob-1234", false)
        .unwrap();
    users
        .create_user(3, "root@x.com", "root", "pw-root-1234", true)
        .unwrap();
    app_with_store(Arc::new(users), Duration::from_secs(2))
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn tokens(&self, email: &str, password: &str) -> (String, String) {
        let (status, body) = self.login(email, password).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn test_alice_login_protected_logout() {
    let app = app();

    let (status, body) = app.login("alice@x.com", "pw-alice-123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 300);
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = app.login("alice@x.com", "wrong").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, body) = app
        .call(Method::GET, "/api/auth/protected", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], 1);

    let (status, body) = app
        .call(Method::POST, "/api/auth/logout", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully logged out");

    let (status, _) = app
        .call(Method::GET, "/api/auth/protected", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = app();

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "alice@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "BadRequest");
    assert!(body["timestamp"].is_u64());

    let (status, body) = app
        .call(Method::POST, "/api/auth/refresh", None, Some(json!({ "token": 1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BadRequest");

    let (access, _) = app.tokens("alice@x.com", "pw-alice-123").await;
    let (status, body) = app
        .call(
            Method::PUT,
            "/api/users/1/password",
            Some(&access),
            Some(json!({ "password": "only-one-field" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BadRequest");
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_look_the_same() {
    let app = app();

    let (status_a, body_a) = app.login("nobody@x.com", "pw-alice-123").await;
    let (status_b, body_b) = app.login("alice@x.com", "not-her-password").await;

    assert_eq!(status_a, StatusCode::BAD_REQUEST);
    assert_eq!(status_a, status_b);
    assert_eq!(body_a["code"], body_b["code"]);
    assert_eq!(body_a["message"], body_b["message"]);
}

#[tokio::test]
async fn test_missing_or_garbage_bearer_is_unauthorized() {
    let app = app();

    let (status, _) = app.call(Method::GET, "/api/auth/protected", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::GET, "/api/auth/protected", Some("not.a.token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotation() {
    let app = app();
    let (_, refresh) = app.tokens("alice@x.com", "pw-alice-123").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = body["access_token"].as_str().unwrap().to_string();
    let new_refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, refresh);

    let (status, _) = app
        .call(Method::GET, "/api/auth/protected", Some(&new_access), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // 已兑换的 refresh token 不能再次使用
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let app = app();
    let (access, refresh) = app.tokens("alice@x.com", "pw-alice-123").await;

    let (status, _) = app
        .call(Method::GET, "/api/auth/protected", Some(&refresh), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": access })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_kills_paired_refresh_token() {
    let app = app();
    let (access, refresh) = app.tokens("alice@x.com", "pw-alice-123").await;

    let (status, _) = app
        .call(Method::POST, "/api/auth/logout", Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_with_foreign_refresh_token_is_forbidden() {
    let app = app();
    let (alice_access, _) = app.tokens("alice@x.com", "pw-alice-123").await;
    let (_, bob_refresh) = app.tokens("bob@x.com", "pw-bob-1234").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/logout",
            Some(&alice_access),
            Some(json!({ "refresh_token": bob_refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_verify_token_endpoint() {
    let app = app();
    let (access, _) = app.tokens("alice@x.com", "pw-alice-123").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/token/verify",
            None,
            Some(json!({ "token": access })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Token valid, user_id: 1");
    assert_eq!(body["user_id"], 1);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/token/verify",
            None,
            Some(json!({ "token": "garbage" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 登出后校验失败（400，而非 401）
    app.call(Method::POST, "/api/auth/logout", Some(&access), None)
        .await;
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/token/verify",
            None,
            Some(json!({ "token": access })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_change_password_ownership() {
    let app = app();
    let (alice, _) = app.tokens("alice@x.com", "pw-alice-123").await;
    let (bob, _) = app.tokens("bob@x.com", "pw-bob-1234").await;
    let (root, _) = app.tokens("root@x.com", "pw-root-1234").await;

    let body = json!({ "password": "new-alice-pw", "password2": "new-alice-pw" });

    let (status, _) = app
        .call(Method::PUT, "/api/users/1/password", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::PUT, "/api/users/1/password", Some(&bob), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/users/1/password",
            Some(&alice),
            Some(json!({ "password": "new-alice-pw", "password2": "different" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(Method::PUT, "/api/users/1/password", Some(&alice), Some(body))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.login("alice@x.com", "new-alice-pw").await;
    assert_eq!(status, StatusCode::OK);

    // 超级用户可以修改他人密码
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/users/2/password",
            Some(&root),
            Some(json!({ "password": "reset-bob-pw", "password2": "reset-bob-pw" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_retrieve_user_requires_authentication() {
    let app = app();
    let (bob, _) = app.tokens("bob@x.com", "pw-bob-1234").await;

    let (status, _) = app.call(Method::GET, "/api/users/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.call(Method::GET, "/api/users/1", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@x.com");
    assert!(body.get("password_hash").is_none());

    let (status, _) = app.call(Method::GET, "/api/users/42", Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_key_and_health() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/public-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let pem = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    assert!(!pem.contains("PRIVATE"));

    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// 查询永远超时的用户存储
struct StalledUserStore;

#[async_trait]
impl UserStore for StalledUserStore {
    async fn find_active_user_by_identifier(
        &self,
        _identifier: &str,
    ) -> Result<Option<UserRecord>, UserStoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    }

    async fn find_active_user_by_id(&self, _id: u64) -> Result<Option<UserRecord>, UserStoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    }

    async fn check_secret(&self, _record: &UserRecord, _secret: &str) -> bool {
        false
    }

    async fn set_secret(&self, _id: u64, _secret: &str) -> Result<bool, UserStoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_user_store_timeout_is_503() {
    let app = app_with_store(Arc::new(StalledUserStore), Duration::from_millis(50));

    let (status, body) = app.login("alice@x.com", "pw-alice-123").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "Service unavailable");
}
