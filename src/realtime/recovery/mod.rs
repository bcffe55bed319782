/**
 * Recovery Orchestrator
 *
 * Brings the realtime core back to a consistent state after the host was
 * suspended, went offline or was restored from the history cache.
 *
 * A recovery sequence runs:
 *
 * 1. a short debounce absorbing rapid flapping
 * 2. make sure the connection is `connected` (reconnecting if needed)
 * 3. re-create every subscription channel
 * 4. invalidate the cache: everything on a full recovery, only observed
 *    entries on a partial one
 * 5. run the registered recovery callbacks, each isolated from the others
 *
 * Only one sequence runs at a time. A trigger arriving while one is active
 * is dropped, not queued.
 *
 * Besides recovery sequences the orchestrator watches the connection
 * status: when it enters `connected` outside of a recovery (a backoff retry
 * succeeding, or the first connect), it starts a resubscribe pass so pending
 * and torn-down channels are re-opened.
 */
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;

use crate::realtime::cache::CacheStore;
use crate::realtime::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::realtime::listeners::{panic_message, Unsubscribe};
use crate::realtime::subscription::{ResubscribeOutcome, SubscriptionRegistry};
use crate::shared::config::RecoverySettings;
use crate::shared::error::{BoxError, RealtimeError};
use crate::shared::event::LifecycleSignal;

/// What asked for a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoverySource {
    /// Host returned to the foreground
    Visibility,
    /// Network came back
    Network,
    /// Page restored from the history cache
    PageShow,
    Manual,
}

impl fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Visibility => "visibility",
            Self::Network => "network",
            Self::PageShow => "pageshow",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Passed to recovery callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryScope {
    pub source: RecoverySource,
    pub full: bool,
}

/// Custom step run at the end of every recovery sequence
pub type RecoveryCallback =
    Arc<dyn Fn(RecoveryScope) -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// Summary of one completed recovery sequence
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub source: RecoverySource,
    pub full: bool,
    /// Subscriptions re-created by this sequence or by the pass it joined;
    /// `None` when the connection or the pass failed
    pub resubscribed: Option<usize>,
    pub invalidated: usize,
    pub callbacks_run: usize,
    /// Names of callbacks that failed or panicked
    pub failed_callbacks: Vec<String>,
    /// Connection or resubscribe failure; the sequence still completes
    pub error: Option<RealtimeError>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Completed(RecoveryReport),
    /// Another sequence was running
    Skipped,
}

impl RecoveryOutcome {
    pub fn report(&self) -> Option<&RecoveryReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RecoveryOrchestrator {
    settings: RecoverySettings,
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<dyn CacheStore>,
    in_progress: AtomicBool,
    hidden_since: Mutex<Option<Instant>>,
    callbacks: Mutex<BTreeMap<u64, (String, RecoveryCallback)>>,
    next_callback: AtomicU64,
    last_report: Mutex<Option<RecoveryReport>>,
    status_listener: Mutex<Option<Unsubscribe>>,
    weak: Weak<RecoveryOrchestrator>,
}

impl RecoveryOrchestrator {
    pub fn new(
        settings: RecoverySettings,
        connection: Arc<ConnectionManager>,
        registry: Arc<SubscriptionRegistry>,
        cache: Arc<dyn CacheStore>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new_cyclic(|weak: &Weak<RecoveryOrchestrator>| Self {
            settings,
            connection: connection.clone(),
            registry,
            cache,
            in_progress: AtomicBool::new(false),
            hidden_since: Mutex::new(None),
            callbacks: Mutex::new(BTreeMap::new()),
            next_callback: AtomicU64::new(0),
            last_report: Mutex::new(None),
            status_listener: Mutex::new(None),
            weak: weak.clone(),
        });

        let weak = orchestrator.weak.clone();
        let previous = Mutex::new(connection.get_status().state);
        let listener = connection.subscribe_to_status(move |status: &ConnectionStatus| {
            let entered = {
                let mut previous = previous.lock();
                let entered = *previous != ConnectionState::Connected && status.is_connected();
                *previous = status.state;
                entered
            };
            if entered {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.on_connected();
                }
            }
        });
        *orchestrator.status_listener.lock() = Some(listener);
        orchestrator
    }

    pub fn is_recovering(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<RecoveryReport> {
        self.last_report.lock().clone()
    }

    /// Register a step run at the end of every recovery sequence
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        callback: impl Fn(RecoveryScope) -> BoxFuture<'static, std::result::Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Unsubscribe {
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().insert(id, (name.into(), Arc::new(callback)));
        let weak = self.weak.clone();
        Unsubscribe::new(move || {
            if let Some(orchestrator) = weak.upgrade() {
                orchestrator.callbacks.lock().remove(&id);
            }
        })
    }

    /// Run a full recovery on behalf of the user
    pub async fn manual_recovery(&self) -> RecoveryOutcome {
        self.trigger_recovery(RecoverySource::Manual, true).await
    }

    /// Run one recovery sequence unless another is already running.
    pub async fn trigger_recovery(&self, source: RecoverySource, full: bool) -> RecoveryOutcome {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::debug!("[Recovery] Recovery already running; dropping {} trigger", source);
            return RecoveryOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.in_progress);

        tokio::time::sleep(self.settings.debounce()).await;
        tracing::info!(
            "[Recovery] Starting {} recovery ({})",
            if full { "full" } else { "partial" },
            source
        );

        let mut error = None;
        let mut resubscribed = None;
        match self.connection.ensure_connected(self.settings.connect_wait()).await {
            Ok(()) => match self.registry.resubscribe_all().await {
                Ok(ResubscribeOutcome::Completed(count)) => resubscribed = Some(count),
                Ok(ResubscribeOutcome::AlreadyRunning) => {
                    // A reconnect-triggered pass got there first; channels
                    // must be back before the cache is invalidated.
                    tracing::debug!("[Recovery] Joining running resubscribe pass");
                    match self.registry.wait_for_resubscribe().await {
                        Some(Ok(count)) => resubscribed = Some(count),
                        Some(Err(err)) => {
                            tracing::warn!("[Recovery] Resubscribe failed: {}", err);
                            error = Some(err);
                        }
                        None => {}
                    }
                }
                Err(err) => {
                    tracing::warn!("[Recovery] Resubscribe failed: {}", err);
                    error = Some(err);
                }
            },
            Err(err) => {
                tracing::warn!("[Recovery] Connection not restored, skipping resubscribe: {}", err);
                error = Some(err);
            }
        }

        let invalidated = if full {
            self.cache.invalidate_all()
        } else {
            self.cache.invalidate_observed()
        };

        let scope = RecoveryScope { source, full };
        let (callbacks_run, failed_callbacks) = self.run_callbacks(scope).await;

        let report = RecoveryReport {
            source,
            full,
            resubscribed,
            invalidated,
            callbacks_run,
            failed_callbacks,
            error,
            completed_at: Utc::now(),
        };
        tracing::info!(
            "[Recovery] Done: {} invalidated, {} callbacks ({} failed)",
            report.invalidated,
            report.callbacks_run,
            report.failed_callbacks.len()
        );
        *self.last_report.lock() = Some(report.clone());
        RecoveryOutcome::Completed(report)
    }

    /// Decide what a host lifecycle signal means for recovery.
    ///
    /// Returns the outcome when the signal started (or tried to start) a
    /// recovery sequence.
    pub async fn on_lifecycle(&self, signal: LifecycleSignal) -> Option<RecoveryOutcome> {
        match signal {
            LifecycleSignal::Visibility { visible: false } => {
                *self.hidden_since.lock() = Some(Instant::now());
                None
            }
            LifecycleSignal::Visibility { visible: true } => {
                let hidden_for = self.hidden_since.lock().take().map(|since| since.elapsed());
                let full = hidden_for.is_some_and(|d| d > self.settings.full_recovery_threshold());
                tracing::debug!("[Recovery] Foreground after {:?}", hidden_for);
                Some(self.trigger_recovery(RecoverySource::Visibility, full).await)
            }
            LifecycleSignal::Online => Some(self.trigger_recovery(RecoverySource::Network, false).await),
            LifecycleSignal::PageShow { persisted: true } => {
                Some(self.trigger_recovery(RecoverySource::PageShow, false).await)
            }
            LifecycleSignal::Focus => {
                self.registry.revalidate();
                None
            }
            LifecycleSignal::Offline | LifecycleSignal::Blur | LifecycleSignal::PageShow { persisted: false } => {
                None
            }
        }
    }

    async fn run_callbacks(&self, scope: RecoveryScope) -> (usize, Vec<String>) {
        let callbacks: Vec<(String, RecoveryCallback)> = self.callbacks.lock().values().cloned().collect();
        let mut failed = Vec::new();

        for (name, callback) in &callbacks {
            let result = match catch_unwind(AssertUnwindSafe(|| callback(scope))) {
                Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(payload) => Err(panic_message(payload.as_ref())),
                },
                Err(payload) => Err(panic_message(payload.as_ref())),
            };
            if let Err(message) = result {
                tracing::error!("[Recovery] Callback {} failed: {}", name, message);
                failed.push(name.clone());
            }
        }
        (callbacks.len(), failed)
    }

    fn on_connected(&self) {
        if self.is_recovering() {
            return;
        }
        let registry = self.registry.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[Recovery] No runtime available for resubscribe");
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = registry.resubscribe_all().await {
                tracing::warn!("[Recovery] Resubscribe after reconnect failed: {}", err);
            }
        });
    }
}

impl Drop for RecoveryOrchestrator {
    fn drop(&mut self) {
        if let Some(listener) = self.status_listener.get_mut().take() {
            listener.unsubscribe();
        }
    }
}
