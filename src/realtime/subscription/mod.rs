/**
 * Subscription Registry
 *
 * Tracks named change subscriptions and keeps one transport channel open
 * per subscription. Collaborators register a [`SubscriptionConfig`] and get
 * an [`Unsubscribe`] handle back; the registry owns the channel.
 *
 * # Channel lifecycle
 *
 * - A subscription registered while the transport is not live stays pending
 *   and is opened by the next resubscribe pass.
 * - A channel that errors or does not confirm within the subscribe timeout
 *   is marked errored and left alone. It is re-created by the next
 *   connection-triggered resubscribe pass (or by [`SubscriptionRegistry::revalidate`]).
 *   Such errors are only visible through status polling.
 *
 * # Callback isolation
 *
 * Each change callback runs inside `catch_unwind`. An `Err` or a panic is
 * routed to that subscription's `on_error` (or logged) and never closes the
 * channel or affects other subscriptions.
 *
 * # Resubscribe pass
 *
 * [`SubscriptionRegistry::resubscribe_all`] waits for the transport to be
 * live (bounded exponential polling), tears every channel down, waits a
 * short settle delay and re-opens every registered subscription. Overlapping
 * passes are dropped; [`SubscriptionRegistry::wait_for_resubscribe`] lets a
 * caller that lost the race wait for the running pass instead.
 */
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::realtime::connection::ConnectionManager;
use crate::realtime::listeners::{panic_message, Unsubscribe};
use crate::realtime::transport::{ChannelId, ChannelSpec, ChannelState, RealtimeTransport};
use crate::shared::config::SubscriptionSettings;
use crate::shared::error::{BoxError, RealtimeError, Result};
use crate::shared::event::{ChangeEvent, EventFilter};
use crate::shared::filter::RowFilter;

/// Collaborator callback invoked for every change event
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Receives errors raised by a subscription's change callback
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// A named change subscription
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Unique per registry
    pub id: String,
    pub resource: String,
    pub event: EventFilter,
    /// `column=op.value` row filter
    pub filter: Option<String>,
    pub callback: ChangeCallback,
    pub on_error: Option<ErrorCallback>,
}

impl SubscriptionConfig {
    /// Subscribe to every change on `resource`
    pub fn new(
        id: impl Into<String>,
        resource: impl Into<String>,
        callback: impl Fn(&ChangeEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            resource: resource.into(),
            event: EventFilter::All,
            filter: None,
            callback: Arc::new(callback),
            on_error: None,
        }
    }

    pub fn event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn on_error(mut self, on_error: impl Fn(&RealtimeError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn summary(&self) -> SubscriptionSummary {
        SubscriptionSummary {
            id: self.id.clone(),
            resource: self.resource.clone(),
            event: self.event,
            filter: self.filter.clone(),
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("event", &self.event)
            .field("filter", &self.filter)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Identity of a subscription without its callbacks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionSummary {
    pub id: String,
    pub resource: String,
    pub event: EventFilter,
    pub filter: Option<String>,
}

/// Health of one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStatus {
    pub id: String,
    pub is_subscribed: bool,
    pub error: Option<RealtimeError>,
    pub subscribed_at: Option<DateTime<Utc>>,
}

/// Result of a resubscribe pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubscribeOutcome {
    /// Channels were re-opened for this many subscriptions
    Completed(usize),
    /// Another pass was already running; nothing was done
    AlreadyRunning,
}

struct Entry {
    config: SubscriptionConfig,
    row_filter: Option<RowFilter>,
    /// Identifies this registration; stale handles check it
    registration: u64,
    /// Bumped on every (re)open; callbacks from older channels are ignored
    epoch: u64,
    channel: Option<ChannelId>,
    status: SubscriptionStatus,
    join_timer: Option<CancellationToken>,
}

impl Entry {
    fn cancel_join_timer(&mut self) {
        if let Some(timer) = self.join_timer.take() {
            timer.cancel();
        }
    }

    /// Detach the channel and mark the entry as not subscribed
    fn reset(&mut self) -> Option<ChannelId> {
        self.cancel_join_timer();
        self.epoch += 1;
        self.status.is_subscribed = false;
        self.channel.take()
    }
}

#[derive(Debug, Default)]
struct PassState {
    running: bool,
    /// Result of the most recently finished pass
    last: Option<Result<usize>>,
}

/// Resets the resubscribe guard when a pass ends, however it ends
struct PassGuard<'a>(&'a watch::Sender<PassState>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|state| state.running = false);
    }
}

/// Registry of named subscriptions multiplexed over one connection
pub struct SubscriptionRegistry {
    weak: Weak<SubscriptionRegistry>,
    settings: SubscriptionSettings,
    connection: Arc<ConnectionManager>,
    entries: Mutex<BTreeMap<String, Entry>>,
    next_registration: AtomicU64,
    pass: watch::Sender<PassState>,
}

impl SubscriptionRegistry {
    pub fn new(settings: SubscriptionSettings, connection: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            settings,
            connection,
            entries: Mutex::new(BTreeMap::new()),
            next_registration: AtomicU64::new(1),
            pass: watch::Sender::new(PassState::default()),
        })
    }

    fn transport(&self) -> &Arc<dyn RealtimeTransport> {
        self.connection.transport()
    }

    /// Register a subscription.
    ///
    /// Re-registering an existing id is a no-op that returns a handle for the
    /// existing subscription. Fails only when the row filter does not parse.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<Unsubscribe> {
        let row_filter = config.filter.as_deref().map(RowFilter::parse).transpose()?;
        let id = config.id.clone();

        let registration = {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(&id) {
                tracing::debug!("[Subscriptions] '{}' already registered", id);
                return Ok(self.handle(&id, existing.registration));
            }
            let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
            entries.insert(
                id.clone(),
                Entry {
                    config,
                    row_filter,
                    registration,
                    epoch: 0,
                    channel: None,
                    status: SubscriptionStatus {
                        id: id.clone(),
                        is_subscribed: false,
                        error: None,
                        subscribed_at: None,
                    },
                    join_timer: None,
                },
            );
            registration
        };

        tracing::info!("[Subscriptions] Registered '{}'", id);
        self.open(&id);
        Ok(self.handle(&id, registration))
    }

    fn handle(&self, id: &str, registration: u64) -> Unsubscribe {
        let weak = self.weak.clone();
        let id = id.to_string();
        Unsubscribe::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.unsubscribe_registration(&id, registration);
            }
        })
    }

    fn unsubscribe_registration(&self, id: &str, registration: u64) {
        let current = self.entries.lock().get(id).map(|e| e.registration);
        if current == Some(registration) {
            self.unsubscribe(id);
        }
    }

    /// Remove a subscription and close its channel
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id);
        match removed {
            Some(mut entry) => {
                if let Some(channel) = entry.reset() {
                    self.transport().close_channel(channel);
                }
                tracing::info!("[Subscriptions] Unsubscribed '{}'", id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        let count = drained.len();
        for (_, mut entry) in drained {
            if let Some(channel) = entry.reset() {
                self.transport().close_channel(channel);
            }
        }
        tracing::info!("[Subscriptions] Removed all {} subscriptions", count);
        count
    }

    /// Remove every subscription on `resource`; returns how many were removed
    pub fn unsubscribe_by_resource(&self, resource: &str) -> usize {
        let ids: Vec<String> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.config.resource == resource)
            .map(|e| e.config.id.clone())
            .collect();
        ids.iter().filter(|id| self.unsubscribe(id)).count()
    }

    pub fn get_status(&self, id: &str) -> Option<SubscriptionStatus> {
        self.entries.lock().get(id).map(|e| e.status.clone())
    }

    /// Statuses of every subscription, ordered by id
    pub fn get_all_statuses(&self) -> Vec<SubscriptionStatus> {
        self.entries.lock().values().map(|e| e.status.clone()).collect()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.entries.lock().get(id).is_some_and(|e| e.status.is_subscribed)
    }

    /// Summaries of every subscription, ordered by id
    pub fn subscriptions(&self) -> Vec<SubscriptionSummary> {
        self.entries.lock().values().map(|e| e.config.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a resubscribe pass is running
    pub fn is_resubscribing(&self) -> bool {
        self.pass.borrow().running
    }

    /// Wait for a running resubscribe pass to finish and return its result.
    ///
    /// Returns immediately with the last pass's result when none is running,
    /// or `None` if no pass has finished yet.
    pub async fn wait_for_resubscribe(&self) -> Option<Result<usize>> {
        let mut rx = self.pass.subscribe();
        let state = rx.wait_for(|state| !state.running).await.ok()?;
        state.last.clone()
    }

    /// Re-create every channel after the connection came back.
    pub async fn resubscribe_all(&self) -> Result<ResubscribeOutcome> {
        let acquired = self.pass.send_if_modified(|state| !std::mem::replace(&mut state.running, true));
        if !acquired {
            tracing::debug!("[Subscriptions] Resubscribe pass already running");
            return Ok(ResubscribeOutcome::AlreadyRunning);
        }
        let _guard = PassGuard(&self.pass);

        let result = self.run_pass().await;
        self.pass.send_modify(|state| state.last = Some(result.clone()));
        result.map(ResubscribeOutcome::Completed)
    }

    async fn run_pass(&self) -> Result<usize> {
        self.wait_until_live().await?;

        let snapshot = self.len();
        let closed: Vec<ChannelId> = self
            .entries
            .lock()
            .values_mut()
            .filter_map(|entry| entry.reset())
            .collect();
        for channel in closed {
            self.transport().close_channel(channel);
        }
        tracing::info!("[Subscriptions] Resubscribing {} subscriptions", snapshot);

        tokio::time::sleep(self.settings.resubscribe_settle()).await;

        let ids: Vec<String> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.channel.is_none())
            .map(|e| e.config.id.clone())
            .collect();
        for id in &ids {
            self.open(id);
        }
        Ok(ids.len())
    }

    /// Re-open errored and pending channels without touching healthy ones.
    ///
    /// Returns how many subscriptions were re-opened.
    pub fn revalidate(&self) -> usize {
        if !self.transport().is_live() {
            return 0;
        }
        let mut stale = Vec::new();
        let ids: Vec<String> = {
            let mut entries = self.entries.lock();
            entries
                .values_mut()
                .filter(|e| !e.status.is_subscribed && (e.status.error.is_some() || e.channel.is_none()))
                .map(|entry| {
                    if let Some(channel) = entry.reset() {
                        stale.push(channel);
                    }
                    entry.config.id.clone()
                })
                .collect()
        };
        for channel in stale {
            self.transport().close_channel(channel);
        }
        for id in &ids {
            self.open(id);
        }
        if !ids.is_empty() {
            tracing::info!("[Subscriptions] Revalidated {} subscriptions", ids.len());
        }
        ids.len()
    }

    async fn wait_until_live(&self) -> Result<()> {
        let mut delay = self.settings.resubscribe_poll_initial();
        for _ in 0..self.settings.resubscribe_poll_attempts {
            if self.transport().is_live() {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.settings.resubscribe_poll_max());
        }
        if self.transport().is_live() {
            Ok(())
        } else {
            tracing::warn!("[Subscriptions] Transport never became live; skipping resubscribe");
            Err(RealtimeError::connection("transport did not become live"))
        }
    }

    /// Open a channel for `id` if the transport is live and none is open
    fn open(&self, id: &str) {
        if !self.transport().is_live() {
            tracing::debug!("[Subscriptions] '{}' pending until the connection is live", id);
            return;
        }

        let (spec, epoch) = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            if entry.channel.is_some() {
                return;
            }
            entry.cancel_join_timer();
            entry.epoch += 1;
            entry.status.error = None;
            let spec = ChannelSpec {
                topic: format!("realtime:{}:{}", entry.config.resource, id),
                resource: entry.config.resource.clone(),
                event: entry.config.event,
                filter: entry.row_filter.clone(),
            };
            (spec, entry.epoch)
        };

        let on_event = {
            let weak = self.weak.clone();
            let id = id.to_string();
            Arc::new(move |event: ChangeEvent| {
                if let Some(registry) = weak.upgrade() {
                    registry.dispatch(&id, epoch, &event);
                }
            })
        };
        let on_state = {
            let weak = self.weak.clone();
            let id = id.to_string();
            Arc::new(move |state: ChannelState| {
                if let Some(registry) = weak.upgrade() {
                    registry.on_channel_state(&id, epoch, state);
                }
            })
        };

        match self.transport().open_channel(spec, on_event, on_state) {
            Ok(channel) => {
                let current = {
                    let mut entries = self.entries.lock();
                    match entries.get_mut(id) {
                        Some(entry) if entry.epoch == epoch => {
                            entry.channel = Some(channel);
                            true
                        }
                        _ => false,
                    }
                };
                if current {
                    self.arm_join_timeout(id, epoch);
                } else {
                    self.transport().close_channel(channel);
                }
            }
            Err(err) => {
                tracing::warn!("[Subscriptions] Could not open channel for '{}': {}", id, err);
                if let Some(entry) = self.entries.lock().get_mut(id) {
                    if entry.epoch == epoch {
                        entry.status.is_subscribed = false;
                        entry.status.error = Some(RealtimeError::subscription(id, err.to_string()));
                    }
                }
            }
        }
    }

    fn arm_join_timeout(&self, id: &str, epoch: u64) {
        let timer = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            if entry.epoch != epoch || entry.status.is_subscribed || entry.status.error.is_some() {
                return;
            }
            entry.cancel_join_timer();
            let timer = CancellationToken::new();
            entry.join_timer = Some(timer.clone());
            timer
        };

        let timeout = self.settings.subscribe_timeout();
        let weak = self.weak.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(registry) = weak.upgrade() {
                        registry.on_channel_state(&id, epoch, ChannelState::TimedOut);
                    }
                }
            }
        });
    }

    fn on_channel_state(&self, id: &str, epoch: u64, state: ChannelState) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        if entry.epoch != epoch {
            return;
        }
        match state {
            ChannelState::Joining => {}
            ChannelState::Subscribed => {
                entry.cancel_join_timer();
                entry.status.is_subscribed = true;
                entry.status.error = None;
                entry.status.subscribed_at = Some(Utc::now());
                tracing::info!("[Subscriptions] '{}' subscribed", id);
            }
            ChannelState::Errored(reason) => {
                entry.cancel_join_timer();
                entry.status.is_subscribed = false;
                entry.status.error = Some(RealtimeError::subscription(id, reason));
                tracing::warn!("[Subscriptions] '{}' channel error; waiting for next resubscribe", id);
            }
            ChannelState::TimedOut => {
                entry.join_timer = None;
                entry.status.is_subscribed = false;
                entry.status.error = Some(RealtimeError::timeout(
                    format!("subscribe '{}'", id),
                    self.settings.subscribe_timeout(),
                ));
                tracing::warn!("[Subscriptions] '{}' timed out; waiting for next resubscribe", id);
            }
            ChannelState::Closed => {
                entry.cancel_join_timer();
                entry.status.is_subscribed = false;
                entry.channel = None;
                tracing::debug!("[Subscriptions] '{}' channel closed", id);
            }
        }
    }

    fn dispatch(&self, id: &str, epoch: u64, event: &ChangeEvent) {
        let (callback, on_error) = {
            let entries = self.entries.lock();
            match entries.get(id) {
                Some(entry) if entry.epoch == epoch => {
                    (entry.config.callback.clone(), entry.config.on_error.clone())
                }
                _ => return,
            }
        };

        let error = match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => RealtimeError::callback(id, err.to_string()),
            Err(payload) => RealtimeError::callback(id, panic_message(payload.as_ref())),
        };

        match on_error {
            Some(on_error) => {
                if catch_unwind(AssertUnwindSafe(|| on_error(&error))).is_err() {
                    tracing::error!("[Subscriptions] Error handler for '{}' panicked", id);
                }
            }
            None => tracing::error!("[Subscriptions] {}", error),
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values_mut() {
            entry.cancel_join_timer();
        }
    }
}
