//! HTTP auth backend tests against a mock GoTrue/PostgREST server

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use community_realtime::realtime::auth::{AuthBackend, HttpAuthBackend};
use community_realtime::realtime::cache::MemoryCache;
use community_realtime::realtime::transport::MemoryTransport;
use community_realtime::{RealtimeCore, RealtimeError};

use crate::common::{mock_config, mount_password_grant, mount_profile, mount_rejected_password_grant};

#[tokio::test]
async fn test_sign_in_loads_profile_and_role() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "u1", "token-1").await;
    mount_profile(&server, "u1", json!({"id": "u1", "username": "ada", "role": "admin", "bio": "hi"})).await;

    let config = mock_config(&server);
    let transport = Arc::new(MemoryTransport::new());
    let core = RealtimeCore::new(
        config.clone(),
        transport.clone(),
        Arc::new(HttpAuthBackend::new(&config)),
        Arc::new(MemoryCache::new()),
    );

    let session = crate::assert_ok!(core.auth().sign_in("ada@example.com", "secret").await);
    assert_eq!(session.user.id, "u1");

    let state = core.get_auth_state();
    let profile = state.profile.expect("profile should load");
    assert_eq!(profile.username.as_deref(), Some("ada"));
    assert_eq!(profile.extra.get("bio"), Some(&json!("hi")));
    assert!(core.auth().has_role(&["admin", "moderator"]));
    assert_eq!(transport.access_token().as_deref(), Some("token-1"));
}

#[tokio::test]
async fn test_rejected_credentials_are_auth_errors() {
    let server = MockServer::start().await;
    mount_rejected_password_grant(&server).await;
    let backend = HttpAuthBackend::new(&mock_config(&server));

    let result = backend.sign_in_with_password("ada@example.com", "wrong").await;
    crate::assert_err!(result, RealtimeError::Auth { .. });
}

#[tokio::test]
async fn test_refresh_uses_refresh_token() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "u1", "token-1").await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({"refresh_token": "refresh-token-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(crate::common::token_body("u1", "token-2")))
        .expect(1)
        .mount(&server)
        .await;
    let backend = HttpAuthBackend::new(&mock_config(&server));

    crate::assert_ok!(backend.sign_in_with_password("ada@example.com", "secret").await);
    let refreshed = crate::assert_ok!(backend.refresh_session().await);
    assert_eq!(refreshed.access_token, "token-2");
}

#[tokio::test]
async fn test_server_errors_keep_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "maintenance"})))
        .mount(&server)
        .await;
    let backend = HttpAuthBackend::new(&mock_config(&server));

    let err = backend.fetch_profile("u1").await.unwrap_err();
    assert_eq!(err, RealtimeError::http(Some(503), "maintenance"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_update_profile_requests_representation() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "u1", "token-1").await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u1"))
        .and(header("Prefer", "return=representation"))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "u1", "full_name": "Ada Lovelace"}])))
        .mount(&server)
        .await;
    let backend = HttpAuthBackend::new(&mock_config(&server));
    crate::assert_ok!(backend.sign_in_with_password("ada@example.com", "secret").await);

    let profile = crate::assert_ok!(backend.update_profile("u1", &json!({"full_name": "Ada Lovelace"})).await);
    assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn test_signup_without_confirmation_returns_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u2", "email": "new@example.com"})))
        .mount(&server)
        .await;
    let backend = HttpAuthBackend::new(&mock_config(&server));

    let session = crate::assert_ok!(backend.sign_up("new@example.com", "secret", None).await);
    assert_eq!(session, None);
}
