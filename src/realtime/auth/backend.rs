//! Auth backend seam and session types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::realtime::connection::TokenProvider;
use crate::shared::error::Result;

/// Authenticated user as reported by the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

/// Access/refresh token pair for a signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Row of the profiles table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Remaining columns
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            full_name: None,
            role: None,
            extra: Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Remote auth + profile storage
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session, refreshed first if it has expired
    async fn get_session(&self) -> Result<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Register a user; returns a session when no confirmation step is required
    async fn sign_up(&self, email: &str, password: &str, metadata: Option<Value>)
        -> Result<Option<Session>>;

    async fn sign_out(&self) -> Result<()>;

    /// Exchange the refresh token for a new session
    async fn refresh_session(&self) -> Result<Session>;

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Apply `changes` to the profile row and return the stored row
    async fn update_profile(&self, user_id: &str, changes: &Value) -> Result<Profile>;
}

/// Feeds the connection manager with the backend's current access token
pub struct BackendTokenProvider {
    backend: Arc<dyn AuthBackend>,
}

impl BackendTokenProvider {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TokenProvider for BackendTokenProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.backend.get_session().await?.map(|s| s.access_token))
    }
}
