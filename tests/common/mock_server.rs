//! Mock GoTrue/PostgREST server helpers
//!
//! Wraps `wiremock` with the endpoints the HTTP auth backend talks to.

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use community_realtime::shared::RealtimeConfig;

pub const TEST_API_KEY: &str = "anon-key";

/// Token endpoint payload for `user_id`
pub fn token_body(user_id: &str, access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": format!("refresh-{}", access_token),
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": user_id,
            "email": "ada@example.com",
            "user_metadata": {}
        }
    })
}

/// Config pointing at the mock server
pub fn mock_config(server: &MockServer) -> RealtimeConfig {
    RealtimeConfig::builder()
        .server_url(server.uri())
        .api_key(TEST_API_KEY)
        .build()
        .expect("mock config should be valid")
}

/// Password grant answering with a session for `user_id`
pub async fn mount_password_grant(server: &MockServer, user_id: &str, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", TEST_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(user_id, access_token)))
        .mount(server)
        .await;
}

/// Password grant rejecting the credentials
pub async fn mount_rejected_password_grant(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(server)
        .await;
}

/// Profile row lookup
pub async fn mount_profile(server: &MockServer, user_id: &str, profile: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", format!("eq.{}", user_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile])))
        .mount(server)
        .await;
}
