//! # Connection Manager
//!
//! Owns the single physical connection to the realtime backend and drives
//! its state machine:
//!
//! ```text
//! disconnected -(connect)-> connecting -(ok)-> connected
//!                               |                  |
//!                             (err)        (heartbeat miss)
//!                               v                  v
//!                             error -(backoff timer)-> connecting
//! ```
//!
//! `disconnect()` returns to `disconnected` from any state.
//!
//! ## Retry budget
//!
//! Failed attempts are retried automatically with [`BackoffStrategy`] until
//! `reconnect_attempts` reaches `max_reconnect_attempts`. After that the
//! status stays `error` until an external trigger (`reconnect()`, a
//! lifecycle signal) starts a fresh budget. `reconnect_attempts` only goes
//! back to zero on a successful connect.
//!
//! ## Timers
//!
//! The reconnect timer and the heartbeat each run as a task with their own
//! [`CancellationToken`]. Every state exit cancels them, and every attempt
//! carries a generation number so a result that arrives after a newer
//! attempt started is ignored.

pub mod backoff;
pub mod heartbeat;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::realtime::listeners::{ListenerSet, Unsubscribe};
use crate::realtime::transport::RealtimeTransport;
use crate::shared::config::ConnectionSettings;
use crate::shared::error::{RealtimeError, Result};
use crate::shared::event::LifecycleSignal;

pub use backoff::BackoffStrategy;
pub use heartbeat::HeartbeatOutcome;

/// Connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<RealtimeError>,
    /// Failed attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// Whether the host is in the foreground
    pub is_visible: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_connected_at: None,
            last_error: None,
            reconnect_attempts: 0,
            is_visible: true,
        }
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Source of the access token used when a connection is opened
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token; `None` means anonymous access
    async fn access_token(&self) -> Result<Option<String>>;
}

/// Read-only view of the managed connection handed to collaborators
#[derive(Clone)]
pub struct ConnectionHandle {
    transport: Arc<dyn RealtimeTransport>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Whether the underlying transport reports an open socket
    pub fn is_live(&self) -> bool {
        self.transport.is_live()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn transport(&self) -> &Arc<dyn RealtimeTransport> {
        &self.transport
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("live", &self.is_live())
            .finish()
    }
}

struct Inner {
    status: ConnectionStatus,
    /// Bumped on every new attempt and on disconnect
    generation: u64,
    reconnect_timer: Option<CancellationToken>,
    heartbeat: Option<CancellationToken>,
    access_token: Option<String>,
}

impl Inner {
    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
    }

    /// Enter `connecting` for a fresh attempt and return its generation
    fn begin_attempt(&mut self) -> u64 {
        self.generation += 1;
        self.cancel_reconnect_timer();
        self.stop_heartbeat();
        self.status.state = ConnectionState::Connecting;
        self.generation
    }
}

enum AttemptOutcome {
    Connected { visible: bool },
    Failed(RealtimeError),
    Stale { disconnected: bool },
}

/// Owner of the realtime connection
pub struct ConnectionManager {
    weak: Weak<ConnectionManager>,
    settings: ConnectionSettings,
    backoff: BackoffStrategy,
    transport: Arc<dyn RealtimeTransport>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ConnectionStatus>,
    listeners: ListenerSet<ConnectionStatus>,
}

impl ConnectionManager {
    /// Create a manager for `transport` using anonymous access
    pub fn new(settings: ConnectionSettings, transport: Arc<dyn RealtimeTransport>) -> Arc<Self> {
        Self::with_token_provider(settings, transport, None)
    }

    /// Create a manager that asks `token_provider` for a session on every attempt
    pub fn with_token_provider(
        settings: ConnectionSettings,
        transport: Arc<dyn RealtimeTransport>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Arc<Self> {
        let backoff = BackoffStrategy::from_settings(&settings);
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            settings,
            backoff,
            transport,
            token_provider,
            inner: Mutex::new(Inner {
                status: ConnectionStatus::default(),
                generation: 0,
                reconnect_timer: None,
                heartbeat: None,
                access_token: None,
            }),
            status_tx,
            listeners: ListenerSet::new(),
        })
    }

    /// Open the connection.
    ///
    /// No-op while `connected` or while an attempt is already in flight.
    pub async fn connect(&self) -> Result<()> {
        let generation = self.update(|inner| match inner.status.state {
            ConnectionState::Connected | ConnectionState::Connecting => None,
            ConnectionState::Disconnected | ConnectionState::Error => Some(inner.begin_attempt()),
        });
        let Some(generation) = generation else {
            tracing::debug!("[Connection] Connect skipped; already connected or connecting");
            return Ok(());
        };
        tracing::info!("[Connection] Connecting");
        self.establish(generation).await
    }

    /// Close the connection and cancel every pending timer. No retry is scheduled.
    pub async fn disconnect(&self) {
        self.update(|inner| {
            inner.generation += 1;
            inner.cancel_reconnect_timer();
            inner.stop_heartbeat();
            inner.status.state = ConnectionState::Disconnected;
        });
        self.transport.disconnect().await;
        tracing::info!("[Connection] Disconnected");
    }

    /// Force a fresh attempt regardless of the current state.
    ///
    /// Counts as an attempt. When automatic retries are exhausted this starts
    /// a new budget.
    pub async fn reconnect(&self) -> Result<()> {
        let max = self.settings.max_reconnect_attempts;
        let generation = self.update(|inner| {
            if inner.status.reconnect_attempts >= max {
                inner.status.reconnect_attempts = 0;
            }
            inner.status.reconnect_attempts += 1;
            inner.begin_attempt()
        });
        tracing::info!("[Connection] Reconnecting");
        self.transport.disconnect().await;
        self.establish(generation).await
    }

    /// Wait until the connection is `connected`.
    ///
    /// Starts a reconnect when disconnected or errored; waits for an
    /// in-flight attempt otherwise.
    pub async fn ensure_connected(&self, timeout: Duration) -> Result<()> {
        let state = self.get_status().state;
        if matches!(state, ConnectionState::Disconnected | ConnectionState::Error) {
            self.reconnect().await?;
        }

        let mut rx = self.status_tx.subscribe();
        let wait = async {
            loop {
                let status = rx.borrow_and_update().clone();
                match status.state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => {}
                    ConnectionState::Disconnected | ConnectionState::Error => {
                        return Err(status
                            .last_error
                            .unwrap_or_else(|| RealtimeError::connection("connection is not open")));
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(RealtimeError::connection("connection manager dropped"));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RealtimeError::timeout("connect", timeout))?
    }

    /// React to a host lifecycle signal
    pub async fn handle_lifecycle(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Visibility { visible: false } => {
                self.update(|inner| {
                    inner.status.is_visible = false;
                    inner.stop_heartbeat();
                });
                tracing::debug!("[Connection] Hidden; heartbeat suspended");
            }
            LifecycleSignal::Visibility { visible: true } => {
                let connected = self.update(|inner| {
                    inner.status.is_visible = true;
                    inner.status.state == ConnectionState::Connected
                });
                if connected {
                    self.start_heartbeat();
                } else if let Err(err) = self.reconnect().await {
                    tracing::warn!("[Connection] Reconnect on foreground failed: {}", err);
                }
            }
            LifecycleSignal::Online => {
                if let Err(err) = self.reconnect().await {
                    tracing::warn!("[Connection] Reconnect on network restore failed: {}", err);
                }
            }
            LifecycleSignal::Offline => self.disconnect().await,
            LifecycleSignal::Focus | LifecycleSignal::Blur | LifecycleSignal::PageShow { .. } => {}
        }
    }

    pub fn get_status(&self) -> ConnectionStatus {
        self.inner.lock().status.clone()
    }

    pub fn get_connection(&self) -> ConnectionHandle {
        ConnectionHandle {
            transport: self.transport.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn RealtimeTransport> {
        &self.transport
    }

    /// Register a listener called with every status change
    pub fn subscribe_to_status(
        &self,
        listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.listeners.subscribe(listener)
    }

    /// Watch channel carrying the latest status
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Whether automatic retries have stopped and a manual trigger is needed
    pub fn is_retry_exhausted(&self) -> bool {
        let status = self.get_status();
        status.state == ConnectionState::Error
            && status.reconnect_attempts >= self.settings.max_reconnect_attempts
    }

    /// Token used for the next attempt; also pushed to the live transport
    pub fn set_access_token(&self, token: Option<String>) {
        self.inner.lock().access_token = token.clone();
        self.transport.set_auth(token);
    }

    /// Apply `mutate` under the lock, then publish the status if it changed
    fn update<R>(&self, mutate: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, changed) = {
            let mut inner = self.inner.lock();
            let before = inner.status.clone();
            let result = mutate(&mut inner);
            let changed = (inner.status != before).then(|| inner.status.clone());
            (result, changed)
        };
        if let Some(status) = changed {
            self.status_tx.send_replace(status.clone());
            self.listeners.notify(&status);
        }
        result
    }

    async fn resolve_token(&self) -> Option<String> {
        let stored = self.inner.lock().access_token.clone();
        let Some(provider) = &self.token_provider else {
            return stored;
        };
        match provider.access_token().await {
            Ok(token) => token.or(stored),
            Err(err) => {
                tracing::warn!("[Connection] Session lookup failed, connecting anonymously: {}", err);
                None
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<()> {
        let token = self.resolve_token().await;
        let result = self.transport.connect(token).await;

        let outcome = self.update(|inner| {
            if inner.generation != generation {
                return AttemptOutcome::Stale {
                    disconnected: inner.status.state == ConnectionState::Disconnected,
                };
            }
            match &result {
                Ok(()) => {
                    inner.status.state = ConnectionState::Connected;
                    inner.status.last_connected_at = Some(Utc::now());
                    inner.status.last_error = None;
                    inner.status.reconnect_attempts = 0;
                    AttemptOutcome::Connected {
                        visible: inner.status.is_visible,
                    }
                }
                Err(err) => {
                    inner.status.state = ConnectionState::Error;
                    inner.status.last_error = Some(err.clone());
                    AttemptOutcome::Failed(err.clone())
                }
            }
        });

        match outcome {
            AttemptOutcome::Connected { visible } => {
                tracing::info!("[Connection] Connected");
                if visible {
                    self.start_heartbeat();
                }
                Ok(())
            }
            AttemptOutcome::Failed(err) => {
                tracing::warn!("[Connection] Connect failed: {}", err);
                self.schedule_reconnect();
                Err(err)
            }
            AttemptOutcome::Stale { disconnected } => {
                tracing::debug!("[Connection] Ignoring result of superseded attempt {}", generation);
                if disconnected && result.is_ok() {
                    self.transport.disconnect().await;
                }
                Ok(())
            }
        }
    }

    fn schedule_reconnect(&self) {
        let max = self.settings.max_reconnect_attempts;
        let scheduled = {
            let mut inner = self.inner.lock();
            if inner.status.state != ConnectionState::Error {
                None
            } else if inner.status.reconnect_attempts >= max {
                tracing::error!(
                    "[Connection] Giving up after {} attempts; waiting for a manual reconnect",
                    inner.status.reconnect_attempts
                );
                None
            } else {
                inner.cancel_reconnect_timer();
                let timer = CancellationToken::new();
                inner.reconnect_timer = Some(timer.clone());
                Some((
                    self.backoff.delay(inner.status.reconnect_attempts),
                    timer,
                    inner.generation,
                ))
            }
        };
        let Some((delay, timer, generation)) = scheduled else {
            return;
        };

        tracing::info!("[Connection] Retrying in {:?}", delay);
        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(manager) = weak.upgrade() {
                        manager.retry_from_timer(generation).await;
                    }
                }
            }
        });
    }

    async fn retry_from_timer(&self, scheduled_generation: u64) {
        let generation = self.update(|inner| {
            if inner.generation != scheduled_generation || inner.status.state != ConnectionState::Error {
                return None;
            }
            inner.reconnect_timer = None;
            inner.status.reconnect_attempts += 1;
            Some(inner.begin_attempt())
        });
        if let Some(generation) = generation {
            // Failure is already logged and rescheduled by establish
            let _ = self.establish(generation).await;
        }
    }

    fn start_heartbeat(&self) {
        let (cancel, generation) = {
            let mut inner = self.inner.lock();
            if inner.status.state != ConnectionState::Connected {
                return;
            }
            inner.stop_heartbeat();
            let cancel = CancellationToken::new();
            inner.heartbeat = Some(cancel.clone());
            (cancel, inner.generation)
        };

        let transport = self.transport.clone();
        let interval = self.settings.heartbeat_interval();
        let weak = self.weak.clone();
        tokio::spawn(async move {
            let outcome = heartbeat::run_heartbeat(transport, interval, cancel).await;
            if let HeartbeatOutcome::Failed(err) = outcome {
                if let Some(manager) = weak.upgrade() {
                    manager.on_heartbeat_failure(generation, err);
                }
            }
        });
    }

    fn on_heartbeat_failure(&self, generation: u64, err: RealtimeError) {
        let lost = self.update(|inner| {
            if inner.generation != generation || inner.status.state != ConnectionState::Connected {
                return false;
            }
            inner.heartbeat = None;
            inner.status.state = ConnectionState::Error;
            inner.status.last_error = Some(err.clone());
            true
        });
        if lost {
            tracing::warn!("[Connection] Heartbeat failed: {}", err);
            self.schedule_reconnect();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.cancel_reconnect_timer();
        inner.stop_heartbeat();
    }
}
