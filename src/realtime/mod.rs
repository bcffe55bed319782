//! # Realtime Core
//!
//! Composition root wiring the components together:
//!
//! ```text
//!                 ┌────────────────────┐
//!   host signals ─▶  RealtimeCore      │
//!                 └──┬─────────────┬───┘
//!                    │             │
//!        ┌───────────▼──┐   ┌──────▼─────────────┐
//!        │ Connection   │◀──│ RecoveryOrchestrator│
//!        │ Manager      │   └──────┬─────────────┘
//!        └──▲────────▲──┘          │
//!   token   │        │ live?       │ resubscribe / invalidate
//!  ┌────────┴─────┐ ┌┴─────────────▼──┐   ┌────────────────┐
//!  │ AuthSession  │ │ Subscription    │◀──│ CacheSyncBridge│
//!  │ Manager      │ │ Registry        │   └────────────────┘
//!  └──────────────┘ └─────────────────┘
//! ```
//!
//! One instance per process is the expected usage, but nothing is global:
//! tests build as many isolated cores as they like.

pub mod auth;
pub mod cache;
pub mod connection;
pub mod lifecycle;
pub mod listeners;
pub mod recovery;
pub mod subscription;
pub mod transport;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::shared::config::RealtimeConfig;
use crate::shared::error::Result;
use crate::shared::event::LifecycleSignal;

use auth::{AuthBackend, AuthSessionManager, AuthState, BackendTokenProvider};
use cache::{CacheStore, CacheSyncBridge, SyncConfig};
use connection::{ConnectionHandle, ConnectionManager, ConnectionStatus, TokenProvider};
use lifecycle::{HostMonitor, HostStatus};
use listeners::Unsubscribe;
use recovery::{RecoveryOrchestrator, RecoveryOutcome};
use subscription::{SubscriptionConfig, SubscriptionRegistry};
use transport::RealtimeTransport;

pub struct RealtimeCore {
    config: RealtimeConfig,
    connection: Arc<ConnectionManager>,
    auth: Arc<AuthSessionManager>,
    registry: Arc<SubscriptionRegistry>,
    cache_sync: Arc<CacheSyncBridge>,
    recovery: Arc<RecoveryOrchestrator>,
    host: Mutex<HostMonitor>,
}

impl RealtimeCore {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn RealtimeTransport>,
        auth_backend: Arc<dyn AuthBackend>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let token_provider: Arc<dyn TokenProvider> = Arc::new(BackendTokenProvider::new(auth_backend.clone()));
        let connection =
            ConnectionManager::with_token_provider(config.connection.clone(), transport, Some(token_provider));
        let auth = AuthSessionManager::new(config.auth.clone(), auth_backend, connection.clone());
        let registry = SubscriptionRegistry::new(config.subscriptions.clone(), connection.clone());
        let cache_sync = CacheSyncBridge::new(registry.clone(), cache.clone());
        let recovery =
            RecoveryOrchestrator::new(config.recovery.clone(), connection.clone(), registry.clone(), cache);

        Self {
            config,
            connection,
            auth,
            registry,
            cache_sync,
            recovery,
            host: Mutex::new(HostMonitor::new()),
        }
    }

    /// Restore the session, then open the connection.
    ///
    /// A failed connect still leaves automatic retries running.
    pub async fn start(&self) -> Result<()> {
        if let Err(err) = self.auth.init().await {
            tracing::warn!("[Realtime] Starting without a session: {}", err);
        }
        self.connection.connect().await
    }

    /// Drop every sync and subscription and close the connection
    pub async fn shutdown(&self) {
        let syncs = self.cache_sync.remove_all_syncs();
        let subscriptions = self.registry.unsubscribe_all();
        self.connection.disconnect().await;
        tracing::info!(
            "[Realtime] Shut down ({} syncs, {} subscriptions removed)",
            syncs,
            subscriptions
        );
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<Unsubscribe> {
        self.registry.subscribe(config)
    }

    pub fn get_connection(&self) -> ConnectionHandle {
        self.connection.get_connection()
    }

    pub fn get_connection_status(&self) -> ConnectionStatus {
        self.connection.get_status()
    }

    pub fn subscribe_to_connection_status(
        &self,
        listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.connection.subscribe_to_status(listener)
    }

    pub fn get_auth_state(&self) -> AuthState {
        self.auth.get_state()
    }

    pub fn subscribe_to_auth_state(&self, listener: impl Fn(&AuthState) + Send + Sync + 'static) -> Unsubscribe {
        self.auth.subscribe(listener)
    }

    pub fn setup_cache_sync(&self, id: &str, config: SyncConfig) -> Result<Unsubscribe> {
        self.cache_sync.setup_sync(id, config)
    }

    pub async fn manual_recovery(&self) -> RecoveryOutcome {
        self.recovery.manual_recovery().await
    }

    /// Feed one host signal to the connection manager and the orchestrator.
    ///
    /// Redundant signals are dropped. Returns the recovery outcome when the
    /// signal started one.
    pub async fn handle_lifecycle(&self, signal: LifecycleSignal) -> Option<RecoveryOutcome> {
        let signal = self.host.lock().observe(signal)?;
        tracing::debug!("[Realtime] Host signal {:?}", signal);
        self.connection.handle_lifecycle(signal).await;
        self.recovery.on_lifecycle(signal).await
    }

    pub fn host_status(&self) -> HostStatus {
        self.host.lock().get_status()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn auth(&self) -> &Arc<AuthSessionManager> {
        &self.auth
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn cache_sync(&self) -> &Arc<CacheSyncBridge> {
        &self.cache_sync
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }
}
