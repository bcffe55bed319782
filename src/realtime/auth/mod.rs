//! # Auth Session Manager
//!
//! Owns the session/token lifecycle on top of an [`AuthBackend`]:
//!
//! - loads the current session on [`AuthSessionManager::init`]
//! - caches the user's profile for a TTL (30 minutes by default)
//! - refreshes the access token ahead of expiry (10 minutes before, never
//!   sooner than one minute from now)
//! - pushes every token change to the [`ConnectionManager`]
//!
//! ## Auth events
//!
//! | Event             | Session/user | Profile            | Refresh timer |
//! |-------------------|--------------|--------------------|---------------|
//! | `SignedIn`        | replaced     | force-refreshed    | rescheduled   |
//! | `UserUpdated`     | user updated | force-refreshed    | unchanged     |
//! | `TokenRefreshed`  | replaced     | untouched          | rescheduled   |
//! | `SignedOut`       | cleared      | cache cleared      | cancelled     |
//!
//! A failed profile fetch is logged and leaves `profile` unset; only
//! failures that prevent authentication end up in [`AuthState::error`].
//! Signing out does not tear down subscriptions.

pub mod backend;
pub mod http;
pub mod memory;
pub mod profile_cache;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::realtime::connection::ConnectionManager;
use crate::realtime::listeners::{ListenerSet, Unsubscribe};
use crate::shared::config::AuthSettings;
use crate::shared::error::{RealtimeError, Result};

pub use backend::{AuthBackend, BackendTokenProvider, Profile, Session, User};
pub use http::HttpAuthBackend;
pub use memory::MemoryAuthBackend;
pub use profile_cache::ProfileCache;

/// Snapshot of the auth layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthState {
    pub session: Option<Session>,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<RealtimeError>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

/// Session change notification
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(User),
}

pub struct AuthSessionManager {
    weak: Weak<AuthSessionManager>,
    settings: AuthSettings,
    backend: Arc<dyn AuthBackend>,
    connection: Arc<ConnectionManager>,
    state: Mutex<AuthState>,
    profiles: Mutex<ProfileCache>,
    refresh_timer: Mutex<Option<CancellationToken>>,
    listeners: ListenerSet<AuthState>,
}

impl AuthSessionManager {
    pub fn new(
        settings: AuthSettings,
        backend: Arc<dyn AuthBackend>,
        connection: Arc<ConnectionManager>,
    ) -> Arc<Self> {
        let profiles = ProfileCache::new(settings.profile_ttl());
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            settings,
            backend,
            connection,
            state: Mutex::new(AuthState::default()),
            profiles: Mutex::new(profiles),
            refresh_timer: Mutex::new(None),
            listeners: ListenerSet::new(),
        })
    }

    /// Load the current session, its profile and schedule the token refresh
    pub async fn init(&self) -> Result<()> {
        self.update(|state| state.loading = true);

        match self.backend.get_session().await {
            Ok(Some(session)) => {
                tracing::info!("[Auth] Restored session for {}", session.user.id);
                self.apply_session(&session);
                self.load_profile(&session.user.id, false).await;
                self.schedule_refresh(&session);
                self.update(|state| state.loading = false);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("[Auth] No session; continuing anonymously");
                self.update(|state| state.loading = false);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("[Auth] Session lookup failed: {}", err);
                self.update(|state| {
                    state.loading = false;
                    state.error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.update(|state| {
            state.loading = true;
            state.error = None;
        });
        match self.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.handle_auth_event(AuthEvent::SignedIn(session.clone())).await;
                self.update(|state| state.loading = false);
                Ok(session)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Register and, when the backend returns a session right away, sign in
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<Option<Session>> {
        self.update(|state| {
            state.loading = true;
            state.error = None;
        });
        match self.backend.sign_up(email, password, metadata).await {
            Ok(session) => {
                if let Some(session) = &session {
                    self.handle_auth_event(AuthEvent::SignedIn(session.clone())).await;
                } else {
                    tracing::info!("[Auth] Sign-up pending confirmation for {}", email);
                }
                self.update(|state| state.loading = false);
                Ok(session)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Sign out. Local state is always cleared, even if the backend call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let remote = self.backend.sign_out().await;
        if let Err(err) = &remote {
            tracing::warn!("[Auth] Remote sign-out failed; clearing local session anyway: {}", err);
        }
        self.handle_auth_event(AuthEvent::SignedOut).await;
        remote
    }

    /// Update the signed-in user's profile and refresh the cached copy
    pub async fn update_profile(&self, changes: Value) -> Result<Profile> {
        let user_id = self
            .state
            .lock()
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or_else(|| RealtimeError::auth("not signed in"))?;

        self.profiles.lock().invalidate();
        let profile = self.backend.update_profile(&user_id, &changes).await?;
        self.profiles.lock().put(&user_id, profile.clone());
        self.update(|state| state.profile = Some(profile.clone()));
        tracing::info!("[Auth] Profile updated for {}", user_id);
        Ok(profile)
    }

    pub fn get_state(&self) -> AuthState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&AuthState) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    /// Whether the cached profile's role is one of `roles`
    pub fn has_role(&self, roles: &[&str]) -> bool {
        self.state
            .lock()
            .profile
            .as_ref()
            .and_then(|p| p.role.as_deref())
            .is_some_and(|role| roles.contains(&role))
    }

    /// Apply a session change, whether it originated here or from the auth service
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                tracing::info!("[Auth] Signed in as {}", session.user.id);
                self.apply_session(&session);
                self.load_profile(&session.user.id, true).await;
                self.schedule_refresh(&session);
            }
            AuthEvent::UserUpdated(user) => {
                let user_id = user.id.clone();
                self.update(|state| {
                    if let Some(session) = &mut state.session {
                        session.user = user.clone();
                    }
                    state.user = Some(user);
                });
                self.load_profile(&user_id, true).await;
            }
            AuthEvent::TokenRefreshed(session) => {
                tracing::debug!("[Auth] Token refreshed for {}", session.user.id);
                self.apply_session(&session);
                self.schedule_refresh(&session);
            }
            AuthEvent::SignedOut => {
                tracing::info!("[Auth] Signed out");
                self.cancel_refresh();
                self.profiles.lock().invalidate();
                self.update(|state| *state = AuthState::default());
                self.connection.set_access_token(None);
            }
        }
    }

    fn apply_session(&self, session: &Session) {
        self.update(|state| {
            state.session = Some(session.clone());
            state.user = Some(session.user.clone());
            state.error = None;
        });
        self.connection.set_access_token(Some(session.access_token.clone()));
    }

    fn fail(&self, err: &RealtimeError) {
        tracing::warn!("[Auth] {}", err);
        self.update(|state| {
            state.loading = false;
            state.error = Some(err.clone());
        });
    }

    /// Cache-first profile load; `force` bypasses and replaces the cache
    async fn load_profile(&self, user_id: &str, force: bool) {
        if force {
            self.profiles.lock().invalidate();
        } else {
            let cached = self.profiles.lock().get(user_id);
            if let Some(profile) = cached {
                self.update(|state| state.profile = Some(profile));
                return;
            }
        }

        match self.backend.fetch_profile(user_id).await {
            Ok(Some(profile)) => {
                self.profiles.lock().put(user_id, profile.clone());
                self.update(|state| state.profile = Some(profile));
            }
            Ok(None) => {
                tracing::debug!("[Auth] No profile row for {}", user_id);
                self.update(|state| state.profile = None);
            }
            Err(err) => {
                tracing::warn!("[Auth] Profile fetch failed for {}: {}", user_id, err);
                self.update(|state| state.profile = None);
            }
        }
    }

    fn schedule_refresh(&self, session: &Session) {
        let until_expiry = (session.expires_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let delay = until_expiry
            .saturating_sub(self.settings.refresh_margin())
            .max(self.settings.min_refresh_delay());
        self.arm_refresh(delay);
    }

    fn arm_refresh(&self, delay: Duration) {
        let timer = CancellationToken::new();
        if let Some(previous) = self.refresh_timer.lock().replace(timer.clone()) {
            previous.cancel();
        }
        tracing::debug!("[Auth] Token refresh in {:?}", delay);

        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(manager) = weak.upgrade() {
                        manager.run_refresh(&timer).await;
                    }
                }
            }
        });
    }

    fn cancel_refresh(&self) {
        if let Some(timer) = self.refresh_timer.lock().take() {
            timer.cancel();
        }
    }

    /// Refresh the token unless `timer` is cancelled while the request is in flight
    async fn run_refresh(&self, timer: &CancellationToken) {
        let result = self.backend.refresh_session().await;
        if timer.is_cancelled() {
            tracing::debug!("[Auth] Dropping refresh result for a replaced or signed-out session");
            return;
        }
        match result {
            Ok(session) => self.handle_auth_event(AuthEvent::TokenRefreshed(session)).await,
            Err(err) => {
                tracing::warn!("[Auth] Token refresh failed: {}", err);
                self.update(|state| state.error = Some(err.clone()));
                self.arm_refresh(self.settings.min_refresh_delay());
            }
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut AuthState)) {
        let changed = {
            let mut state = self.state.lock();
            let before = state.clone();
            mutate(&mut state);
            (*state != before).then(|| state.clone())
        };
        if let Some(state) = changed {
            self.listeners.notify(&state);
        }
    }
}

impl Drop for AuthSessionManager {
    fn drop(&mut self) {
        if let Some(timer) = self.refresh_timer.get_mut().take() {
            timer.cancel();
        }
    }
}
