//! Integration tests: build the router over in-memory stores and drive the
//! login, refresh, logout and authorization flows end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tollgate_api::{AppState, config::ApiConfig};
use tollgate_core::auth::authz::{AuthorizationOracle, PolicyRule, PolicyTable};
use tollgate_core::auth::config::AuthConfig;
use tollgate_core::auth::jwt::TokenCodec;
use tollgate_core::auth::session::SessionService;
use tollgate_core::auth::store::{CredentialStore, MemoryCredentialStore};
use tollgate_core::coordination::{CoordinationStore, MemoryCoordinationStore};
use tollgate_core::models::auth::SubscriptionStatus;
use tower::ServiceExt;

struct Harness {
    app: Router,
    store: Arc<MemoryCredentialStore>,
}

fn build(
    auth: AuthConfig,
    store: Arc<MemoryCredentialStore>,
    substrate: Option<Arc<dyn CoordinationStore>>,
) -> Router {
    let codec = Arc::new(
        TokenCodec::new(b"access-secret", b"refresh-secret", auth.access_ttl, auth.refresh_ttl)
            .expect("codec"),
    );
    let session = SessionService::assemble(
        &auth,
        codec,
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        substrate,
    );
    let oracle: Arc<dyn AuthorizationOracle> = Arc::new(PolicyTable::new(vec![
        PolicyRule::new("admin", "*", "*", "*"),
        PolicyRule::new("user", "pro", "reports/*", "read"),
    ]));
    tollgate_api::router(AppState {
        session: Arc::new(session),
        oracle,
        config: ApiConfig {
            bind_addr: "127.0.0.1:0".into(),
            pg_connection_url: "postgres://unused".into(),
            redis_url: None,
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            auth,
        },
    })
}

fn harness(auth: AuthConfig) -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    Harness {
        app: build(auth, Arc::clone(&store), None),
        store,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, json)
}

async fn register(app: &Router, username: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "correct horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register {username}: {body}");
    body
}

async fn refresh(app: &Router, token: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/refresh-token",
        None,
        Some(json!({ "refreshToken": token })),
    )
    .await
}

fn field(body: &Value, name: &str) -> String {
    body[name]
        .as_str()
        .unwrap_or_else(|| panic!("missing '{name}' in {body}"))
        .to_string()
}

#[tokio::test]
async fn health_reports_local_coordination() {
    let h = harness(AuthConfig::default());
    let (status, body) = send(&h.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distributedRefresh"], json!(false));
    assert!(body.get("version").is_some());
}

#[tokio::test]
async fn first_registration_is_admin_and_later_ones_are_users() {
    let h = harness(AuthConfig::default());
    let first = register(&h.app, "alice").await;
    let second = register(&h.app, "bob").await;

    assert_eq!(first["user"]["role"], json!("admin"));
    assert_eq!(second["user"]["role"], json!("user"));
    assert_eq!(second["user"]["plan"], json!("free"));
    assert_eq!(second["tokenType"], json!("Bearer"));
    assert!(second["expiresIn"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn register_rejects_short_password() {
    let h = harness(AuthConfig::default());
    let (status, body) = send(
        &h.app,
        "POST",
        "/register",
        None,
        Some(json!({ "username": "alice", "email": "alice@example.com", "password": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));
}

#[tokio::test]
async fn login_accepts_username_or_email() {
    let h = harness(AuthConfig::default());
    register(&h.app, "alice").await;

    for identifier in ["alice", "ALICE@example.com"] {
        let (status, body) = send(
            &h.app,
            "POST",
            "/login",
            None,
            Some(json!({ "identifier": identifier, "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{identifier}: {body}");
        assert_eq!(body["user"]["username"], json!("alice"));
    }
}

#[tokio::test]
async fn bad_credentials_look_the_same() {
    let h = harness(AuthConfig::default());
    register(&h.app, "alice").await;

    let (wrong_pw, a) = send(
        &h.app,
        "POST",
        "/login",
        None,
        Some(json!({ "identifier": "alice", "password": "wrong password" })),
    )
    .await;
    let (unknown, b) = send(
        &h.app,
        "POST",
        "/login",
        None,
        Some(json!({ "identifier": "nobody", "password": "wrong password" })),
    )
    .await;
    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(a, b);
}

#[tokio::test]
async fn refresh_rotates_and_old_token_answers_within_grace() {
    let h = harness(AuthConfig::default());
    let session = register(&h.app, "alice").await;
    let original = field(&session, "refreshToken");

    let (status, first) = refresh(&h.app, &original).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(field(&first, "refreshToken"), original);

    // A retry with the just-consumed token gets the same pair back.
    let (status, retry) = refresh(&h.app, &original).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(field(&retry, "accessToken"), field(&first, "accessToken"));
    assert_eq!(field(&retry, "refreshToken"), field(&first, "refreshToken"));

    // The new token keeps rotating normally.
    let (status, second) = refresh(&h.app, &field(&first, "refreshToken")).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(field(&second, "refreshToken"), field(&first, "refreshToken"));
}

#[tokio::test]
async fn concurrent_refreshes_receive_one_pair() {
    let h = harness(AuthConfig::default());
    let session = register(&h.app, "alice").await;
    let token = field(&session, "refreshToken");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = h.app.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { refresh(&app, &token).await }));
    }

    let mut pairs = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{body}");
        pairs.push((field(&body, "accessToken"), field(&body, "refreshToken")));
    }
    assert!(pairs.windows(2).all(|w| w[0] == w[1]));

    let stored = h
        .store
        .find_by_identifier("alice")
        .await
        .unwrap()
        .unwrap()
        .refresh_token;
    assert_eq!(stored.as_deref(), Some(pairs[0].1.as_str()));
}

#[tokio::test]
async fn concurrent_refreshes_across_replicas_receive_one_pair() {
    let store = Arc::new(MemoryCredentialStore::new());
    let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
    let a = build(AuthConfig::default(), Arc::clone(&store), Some(Arc::clone(&substrate)));
    let b = build(AuthConfig::default(), Arc::clone(&store), Some(substrate));

    let session = register(&a, "alice").await;
    let token = field(&session, "refreshToken");

    let mut handles = Vec::new();
    for i in 0..6 {
        let app = if i % 2 == 0 { a.clone() } else { b.clone() };
        let token = token.clone();
        handles.push(tokio::spawn(async move { refresh(&app, &token).await }));
    }

    let mut pairs = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{body}");
        pairs.push((field(&body, "accessToken"), field(&body, "refreshToken")));
    }
    assert!(pairs.windows(2).all(|w| w[0] == w[1]));

    let (_, health) = send(&b, "GET", "/health", None, None).await;
    assert_eq!(health["distributedRefresh"], json!(true));
}

#[tokio::test]
async fn stale_token_after_grace_is_forbidden() {
    let h = harness(AuthConfig {
        used_token_grace: Duration::from_millis(50),
        ..AuthConfig::default()
    });
    let session = register(&h.app, "alice").await;
    let original = field(&session, "refreshToken");

    let (status, rotated) = refresh(&h.app, &original).await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let (status, body) = refresh(&h.app, &original).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("token_invalid"));

    // Without revoke-on-replay the legitimate holder is unaffected.
    let (status, _) = refresh(&h.app, &field(&rotated, "refreshToken")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn replay_can_revoke_the_session() {
    let h = harness(AuthConfig {
        used_token_grace: Duration::from_millis(50),
        revoke_on_replay: true,
        ..AuthConfig::default()
    });
    let session = register(&h.app, "alice").await;
    let original = field(&session, "refreshToken");

    let (_, rotated) = refresh(&h.app, &original).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let (status, _) = refresh(&h.app, &original).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = refresh(&h.app, &field(&rotated, "refreshToken")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn garbage_and_access_tokens_are_not_refresh_tokens() {
    let h = harness(AuthConfig::default());
    let session = register(&h.app, "alice").await;

    let (status, body) = refresh(&h.app, "not-a-jwt").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("token_invalid"));

    let (status, _) = refresh(&h.app, &field(&session, "accessToken")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_is_idempotent_and_ends_refresh() {
    let h = harness(AuthConfig::default());
    let session = register(&h.app, "alice").await;
    let access = field(&session, "accessToken");

    for _ in 0..2 {
        let (status, body) = send(&h.app, "POST", "/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    let (status, _) = refresh(&h.app, &field(&session, "refreshToken")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let h = harness(AuthConfig::default());
    let (status, body) = send(&h.app, "GET", "/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("unauthorized"));

    let (status, _) = send(&h.app, "GET", "/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_access_token_asks_for_refresh() {
    let h = harness(AuthConfig {
        access_ttl: Duration::from_secs(1),
        ..AuthConfig::default()
    });
    let session = register(&h.app, "alice").await;
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let (status, body) = send(&h.app, "GET", "/me", Some(&field(&session, "accessToken")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("token_expired"));
}

#[tokio::test]
async fn me_reports_claims_and_refresh_hint() {
    let relaxed = harness(AuthConfig::default());
    let session = register(&relaxed.app, "alice").await;
    let (status, body) = send(&relaxed.app, "GET", "/me", Some(&field(&session, "accessToken")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], json!("admin"));
    assert_eq!(body["refreshDue"], json!(false));

    // An access lifetime inside the early window is due immediately.
    let eager = harness(AuthConfig {
        access_ttl: Duration::from_secs(30),
        ..AuthConfig::default()
    });
    let session = register(&eager.app, "alice").await;
    let (_, body) = send(&eager.app, "GET", "/me", Some(&field(&session, "accessToken")), None).await;
    assert_eq!(body["refreshDue"], json!(true));
}

#[tokio::test]
async fn authorize_uses_role_and_effective_plan() {
    let h = harness(AuthConfig::default());
    register(&h.app, "admin").await;
    let session = register(&h.app, "bob").await;
    let bob_id = field(&session["user"], "id");
    let ask = json!({ "resource": "reports/weekly", "action": "read" });

    let (status, body) = send(
        &h.app,
        "POST",
        "/authorize",
        Some(&field(&session, "accessToken")),
        Some(ask.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], json!(false));

    // Upgrading takes effect once the next access token is minted.
    assert!(h.store.set_subscription(&bob_id, Some("pro"), SubscriptionStatus::Active));
    let (_, rotated) = refresh(&h.app, &field(&session, "refreshToken")).await;
    let (_, body) = send(
        &h.app,
        "POST",
        "/authorize",
        Some(&field(&rotated, "accessToken")),
        Some(ask),
    )
    .await;
    assert_eq!(body["allowed"], json!(true));
}
