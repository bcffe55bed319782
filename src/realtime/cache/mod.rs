//! # Cache Sync Bridge
//!
//! Turns change events into cache updates. Each sync registers one
//! subscription (`cache-sync:<id>`) with the [`SubscriptionRegistry`] and
//! applies its [`SyncStrategy`] to the keys its `keys` function returns.
//!
//! Updates that only touched liveness fields (presence timestamps) are
//! dropped before anything is written or invalidated, when the sync carries
//! a [`LivenessFilter`].

pub mod liveness;
pub mod store;
pub mod strategy;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::realtime::listeners::Unsubscribe;
use crate::realtime::subscription::{SubscriptionConfig, SubscriptionRegistry};
use crate::shared::error::Result;
use crate::shared::event::{ChangeEvent, ChangeType, EventFilter};

pub use liveness::{LivenessFilter, LivenessPredicate};
pub use store::{CacheKey, CacheStore, MemoryCache};
pub use strategy::SyncStrategy;

/// Maps a change event to the cache keys it affects
pub type KeysFn = Arc<dyn Fn(&ChangeEvent) -> Vec<CacheKey> + Send + Sync>;

/// How one resource's changes flow into the cache
#[derive(Clone)]
pub struct SyncConfig {
    pub resource: String,
    pub keys: KeysFn,
    pub event: EventFilter,
    pub filter: Option<String>,
    pub strategy: SyncStrategy,
    /// Row identity used by list merges
    pub id_field: String,
    /// Keys invalidated in addition to `keys`, for every significant change
    pub dependent_keys: Option<KeysFn>,
    pub liveness: Option<LivenessFilter>,
}

impl SyncConfig {
    pub fn new(
        resource: impl Into<String>,
        strategy: SyncStrategy,
        keys: impl Fn(&ChangeEvent) -> Vec<CacheKey> + Send + Sync + 'static,
    ) -> Self {
        Self {
            resource: resource.into(),
            keys: Arc::new(keys),
            event: EventFilter::All,
            filter: None,
            strategy,
            id_field: "id".to_string(),
            dependent_keys: None,
            liveness: None,
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

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn dependent_keys(
        mut self,
        keys: impl Fn(&ChangeEvent) -> Vec<CacheKey> + Send + Sync + 'static,
    ) -> Self {
        self.dependent_keys = Some(Arc::new(keys));
        self
    }

    pub fn liveness(mut self, filter: LivenessFilter) -> Self {
        self.liveness = Some(filter);
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("resource", &self.resource)
            .field("event", &self.event)
            .field("filter", &self.filter)
            .field("strategy", &self.strategy)
            .field("id_field", &self.id_field)
            .field("dependent_keys", &self.dependent_keys.is_some())
            .field("liveness", &self.liveness)
            .finish()
    }
}

/// What applying one change event did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    /// Entries written or removed in place
    pub updated: usize,
    /// Entries marked stale, dependents included
    pub invalidated: usize,
    /// Dropped as a liveness-only update
    pub skipped: bool,
}

/// Apply one change event to `cache` according to `config`.
pub fn apply_change(config: &SyncConfig, cache: &dyn CacheStore, event: &ChangeEvent) -> SyncOutcome {
    if config
        .liveness
        .as_ref()
        .is_some_and(|filter| filter.is_liveness_only(event))
    {
        tracing::trace!("[CacheSync] Skipping liveness-only update on {}", config.resource);
        return SyncOutcome {
            skipped: true,
            ..SyncOutcome::default()
        };
    }

    let mut outcome = SyncOutcome::default();
    for key in (config.keys)(event) {
        match config.strategy {
            SyncStrategy::Invalidate => outcome.invalidated += cache.invalidate(&key),
            SyncStrategy::Merge => {
                let merged = cache
                    .get(&key)
                    .and_then(|current| strategy::merge(&current, event, &config.id_field));
                if let Some(next) = merged {
                    cache.set(&key, next);
                    outcome.updated += 1;
                }
            }
            SyncStrategy::Replace => {
                match &event.new {
                    Some(new) => cache.set(&key, new.clone()),
                    None => cache.remove(&key),
                }
                outcome.updated += 1;
            }
            SyncStrategy::Remove => {
                if event.event_type != ChangeType::Delete {
                    continue;
                }
                let stripped = cache
                    .get(&key)
                    .and_then(|current| strategy::remove_from_list(&current, event, &config.id_field));
                if let Some(next) = stripped {
                    cache.set(&key, next);
                    outcome.updated += 1;
                }
            }
        }
    }

    if let Some(dependents) = &config.dependent_keys {
        for key in dependents(event) {
            outcome.invalidated += cache.invalidate(&key);
        }
    }

    tracing::debug!(
        "[CacheSync] {} {:?}: {} updated, {} invalidated",
        config.resource,
        event.event_type,
        outcome.updated,
        outcome.invalidated
    );
    outcome
}

struct SyncEntry {
    resource: String,
    /// Identifies this setup; handles from an earlier setup of the same id check it
    registration: u64,
}

pub struct CacheSyncBridge {
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<dyn CacheStore>,
    syncs: Mutex<BTreeMap<String, SyncEntry>>,
    next_registration: AtomicU64,
    weak: Weak<CacheSyncBridge>,
}

impl CacheSyncBridge {
    pub fn new(registry: Arc<SubscriptionRegistry>, cache: Arc<dyn CacheStore>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry,
            cache,
            syncs: Mutex::new(BTreeMap::new()),
            next_registration: AtomicU64::new(1),
            weak: weak.clone(),
        })
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    fn subscription_id(id: &str) -> String {
        format!("cache-sync:{}", id)
    }

    fn handle(&self, id: &str, registration: u64) -> Unsubscribe {
        let weak = self.weak.clone();
        let id = id.to_string();
        Unsubscribe::new(move || {
            if let Some(bridge) = weak.upgrade() {
                bridge.remove_registration(&id, registration);
            }
        })
    }

    fn remove_registration(&self, id: &str, registration: u64) {
        let current = self.syncs.lock().get(id).map(|entry| entry.registration);
        if current == Some(registration) {
            self.remove_sync(id);
        }
    }

    /// Start syncing `config.resource` into the cache.
    ///
    /// A second call with an id already in use keeps the existing sync.
    pub fn setup_sync(&self, id: &str, config: SyncConfig) -> Result<Unsubscribe> {
        let existing = self.syncs.lock().get(id).map(|entry| entry.registration);
        if let Some(registration) = existing {
            tracing::debug!("[CacheSync] Sync {} already set up", id);
            return Ok(self.handle(id, registration));
        }

        let resource = config.resource.clone();
        let mut subscription = SubscriptionConfig::new(Self::subscription_id(id), resource.clone(), {
            let cache = self.cache.clone();
            let config = config.clone();
            move |event| {
                apply_change(&config, cache.as_ref(), event);
                Ok(())
            }
        })
        .event(config.event);
        if let Some(filter) = &config.filter {
            subscription = subscription.filter(filter.clone());
        }
        subscription = subscription.on_error({
            let id = id.to_string();
            move |err| tracing::warn!("[CacheSync] Sync {} failed to apply change: {}", id, err)
        });

        // The registry handle is not kept; removal goes through the id
        let _ = self.registry.subscribe(subscription)?;
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.syncs.lock().insert(
            id.to_string(),
            SyncEntry {
                resource: resource.clone(),
                registration,
            },
        );
        tracing::info!("[CacheSync] Syncing {} as {} ({:?})", resource, id, config.strategy);
        Ok(self.handle(id, registration))
    }

    pub fn remove_sync(&self, id: &str) -> bool {
        if self.syncs.lock().remove(id).is_none() {
            return false;
        }
        self.registry.unsubscribe(&Self::subscription_id(id));
        tracing::debug!("[CacheSync] Removed sync {}", id);
        true
    }

    pub fn remove_syncs_by_resource(&self, resource: &str) -> usize {
        let ids: Vec<String> = self
            .syncs
            .lock()
            .iter()
            .filter(|(_, entry)| entry.resource == resource)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter(|id| self.remove_sync(id)).count()
    }

    pub fn remove_all_syncs(&self) -> usize {
        let ids: Vec<String> = self.syncs.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.remove_sync(id)).count()
    }

    pub fn sync_ids(&self) -> Vec<String> {
        self.syncs.lock().keys().cloned().collect()
    }
}
