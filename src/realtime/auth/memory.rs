//! # In-Memory Auth Backend
//!
//! [`AuthBackend`] keeping accounts, profiles and the current session in
//! process. Issues opaque tokens with a configurable lifetime and supports
//! scripted profile/refresh failures and slow refreshes.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::backend::{AuthBackend, Profile, Session, User};
use crate::shared::error::{RealtimeError, Result};

struct Account {
    password: String,
    user: User,
}

struct MemoryAuthState {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, Profile>,
    session: Option<Session>,
    token_lifetime: chrono::Duration,
    next_token: u64,
    fail_profiles: bool,
    fail_refresh: bool,
    refresh_delay: Duration,
    profile_fetches: usize,
    refreshes: usize,
}

impl MemoryAuthState {
    fn issue(&mut self, user: User) -> Session {
        self.next_token += 1;
        let session = Session {
            access_token: format!("access-{}", self.next_token),
            refresh_token: format!("refresh-{}", self.next_token),
            expires_at: Utc::now() + self.token_lifetime,
            user,
        };
        self.session = Some(session.clone());
        session
    }
}

pub struct MemoryAuthBackend {
    state: Mutex<MemoryAuthState>,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryAuthState {
                accounts: HashMap::new(),
                profiles: HashMap::new(),
                session: None,
                token_lifetime: chrono::Duration::hours(1),
                next_token: 0,
                fail_profiles: false,
                fail_refresh: false,
                refresh_delay: Duration::ZERO,
                profile_fetches: 0,
                refreshes: 0,
            }),
        }
    }

    /// Add an account with an optional profile row; returns the user id
    pub fn add_account(&self, email: &str, password: &str, profile: Option<Profile>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: User {
                    id: id.clone(),
                    email: Some(email.to_string()),
                    user_metadata: Value::Null,
                },
            },
        );
        if let Some(mut profile) = profile {
            profile.id = id.clone();
            state.profiles.insert(id.clone(), profile);
        }
        id
    }

    pub fn set_token_lifetime(&self, lifetime: chrono::Duration) {
        self.state.lock().token_lifetime = lifetime;
    }

    pub fn fail_profile_fetches(&self, fail: bool) {
        self.state.lock().fail_profiles = fail;
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.state.lock().fail_refresh = fail;
    }

    /// Delay every refresh response; the session is validated before the delay
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    /// Replace a stored profile row
    pub fn put_profile(&self, profile: Profile) {
        self.state.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn profile_fetches(&self) -> usize {
        self.state.lock().profile_fetches
    }

    pub fn refreshes(&self) -> usize {
        self.state.lock().refreshes
    }
}

impl Default for MemoryAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.state.lock().session.clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let mut state = self.state.lock();
        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(RealtimeError::auth("Invalid login credentials")),
        };
        Ok(state.issue(user))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Option<Session>> {
        if self.state.lock().accounts.contains_key(email) {
            return Err(RealtimeError::auth("User already registered"));
        }
        let id = self.add_account(email, password, None);

        let mut state = self.state.lock();
        if let Some(account) = state.accounts.get_mut(email) {
            account.user.user_metadata = metadata.unwrap_or(Value::Null);
        }
        state.profiles.insert(id.clone(), Profile::new(id));
        let user = state.accounts.get(email).map(|a| a.user.clone());
        Ok(user.map(|user| state.issue(user)))
    }

    async fn sign_out(&self) -> Result<()> {
        self.state.lock().session = None;
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let (user, delay) = {
            let mut state = self.state.lock();
            state.refreshes += 1;
            if state.fail_refresh {
                return Err(RealtimeError::http(Some(503), "refresh unavailable"));
            }
            let user = state
                .session
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or_else(|| RealtimeError::auth("no session to refresh"))?;
            (user, state.refresh_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().issue(user))
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let mut state = self.state.lock();
        state.profile_fetches += 1;
        if state.fail_profiles {
            return Err(RealtimeError::http(Some(500), "profile query failed"));
        }
        Ok(state.profiles.get(user_id).cloned())
    }

    async fn update_profile(&self, user_id: &str, changes: &Value) -> Result<Profile> {
        let mut state = self.state.lock();
        let current = state
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| RealtimeError::http(Some(404), format!("no profile for {}", user_id)))?;

        let mut row = serde_json::to_value(current)?;
        if let (Some(row), Some(changes)) = (row.as_object_mut(), changes.as_object()) {
            for (key, value) in changes {
                row.insert(key.clone(), value.clone());
            }
        }
        let updated: Profile = serde_json::from_value(row)?;
        state.profiles.insert(user_id.to_string(), updated.clone());
        Ok(updated)
    }
}
