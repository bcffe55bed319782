/**
 * HTTP Auth Backend
 *
 * [`AuthBackend`] speaking the GoTrue/PostgREST REST API exposed by the
 * community backend:
 *
 * - `POST /auth/v1/token?grant_type=password`
 * - `POST /auth/v1/token?grant_type=refresh_token`
 * - `POST /auth/v1/signup`
 * - `POST /auth/v1/logout`
 * - `GET|PATCH /rest/v1/<profile table>?id=eq.<id>`
 *
 * Every request carries the `apikey` header when one is configured. The
 * current session is kept in memory; `get_session` refreshes it once it
 * has expired.
 */
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::backend::{AuthBackend, Profile, Session, User};
use crate::shared::config::RealtimeConfig;
use crate::shared::error::{RealtimeError, Result};

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(self.expires_in.unwrap_or(3_600)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    profile_table: String,
    session: Mutex<Option<Session>>,
}

impl HttpAuthBackend {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &RealtimeConfig) -> Self {
        Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            profile_table: config.auth.profile_table.clone(),
            session: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        let bearer = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.access_token.clone())
            .or_else(|| self.api_key.clone());
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> Result<Session> {
        let response = self
            .request(Method::POST, &format!("/auth/v1/token?grant_type={}", grant_type))
            .json(&body)
            .send()
            .await?;
        let response = check(response, "token request").await?;
        let session = response.json::<TokenResponse>().await?.into_session();
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    fn profile_path(&self, user_id: &str) -> String {
        format!("/rest/v1/{}?id=eq.{}", self.profile_table, user_id)
    }
}

/// Turn a non-success response into an error.
///
/// 400/401/403/422 on auth endpoints are credential problems, not transport failures.
async fn check(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| status.to_string());
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or(body);

    tracing::warn!("[Auth] {} failed: {} - {}", context, status, message);
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::UNPROCESSABLE_ENTITY => Err(RealtimeError::auth(message)),
        _ => Err(RealtimeError::http(Some(status.as_u16()), message)),
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        let current = self.session.lock().clone();
        match current {
            Some(session) if session.is_expired() => self.refresh_session().await.map(Some),
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.token_request("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Option<Session>> {
        let response = self
            .request(Method::POST, "/auth/v1/signup")
            .json(&json!({
                "email": email,
                "password": password,
                "data": metadata.unwrap_or_else(|| json!({})),
            }))
            .send()
            .await?;
        let body: Value = check(response, "sign up").await?.json().await?;

        // Without email confirmation the response is a full token payload
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
            *self.session.lock() = Some(session.clone());
            Ok(Some(session))
        } else {
            Ok(None)
        }
    }

    async fn sign_out(&self) -> Result<()> {
        let had_session = self.session.lock().is_some();
        if had_session {
            let response = self.request(Method::POST, "/auth/v1/logout").send().await;
            *self.session.lock() = None;
            check(response?, "sign out").await?;
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or_else(|| RealtimeError::auth("no session to refresh"))?;
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let response = self
            .request(Method::GET, &format!("{}&select=*", self.profile_path(user_id)))
            .send()
            .await?;
        let rows: Vec<Profile> = check(response, "profile fetch").await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn update_profile(&self, user_id: &str, changes: &Value) -> Result<Profile> {
        let response = self
            .request(Method::PATCH, &self.profile_path(user_id))
            .header("Prefer", "return=representation")
            .json(changes)
            .send()
            .await?;
        let rows: Vec<Profile> = check(response, "profile update").await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RealtimeError::http(Some(404), format!("no profile for {}", user_id)))
    }
}
