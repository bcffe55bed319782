//! # Cache Store
//!
//! The cache-sync bridge writes to an external query cache through
//! [`CacheStore`]. Keys are tuples of strings (e.g. `["posts", "list"]` or
//! `["profile", "<id>"]`); invalidation matches on key prefixes.
//!
//! [`MemoryCache`] is the in-process implementation. It tracks which keys are
//! currently observed by mounted collaborators so partial recovery can
//! refresh only those.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::realtime::listeners::Unsubscribe;

/// Tuple key identifying one cached value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` matches the leading parts of this key
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<&[&str]> for CacheKey {
    fn from(parts: &[&str]) -> Self {
        Self::new(parts.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for CacheKey {
    fn from(parts: [&str; N]) -> Self {
        Self::new(parts)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// External query cache
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Value>;

    fn set(&self, key: &CacheKey, value: Value);

    fn remove(&self, key: &CacheKey);

    /// Mark every entry under `prefix` stale; returns how many were marked
    fn invalidate(&self, prefix: &CacheKey) -> usize;

    /// Mark every entry stale
    fn invalidate_all(&self) -> usize;

    /// Mark entries with at least one active observer stale
    fn invalidate_observed(&self) -> usize;
}

#[derive(Debug, Default)]
struct CacheEntry {
    value: Option<Value>,
    stale: bool,
    observers: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<CacheKey, CacheEntry>,
    invalidations: usize,
}

impl CacheState {
    fn mark_stale(&mut self, select: impl Fn(&CacheKey, &CacheEntry) -> bool) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries.iter_mut() {
            if select(key, entry) {
                entry.stale = true;
                count += 1;
            }
        }
        self.invalidations += count;
        count
    }
}

/// In-process [`CacheStore`]
#[derive(Debug, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer of `key` (a mounted collaborator reading it).
    ///
    /// A slot created only for observing is dropped with its last observer.
    pub fn observe(&self, key: CacheKey) -> Unsubscribe {
        self.state.lock().entries.entry(key.clone()).or_default().observers += 1;

        let weak: Weak<Mutex<CacheState>> = Arc::downgrade(&self.state);
        Unsubscribe::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                let orphaned = match state.entries.get_mut(&key) {
                    Some(entry) => {
                        entry.observers = entry.observers.saturating_sub(1);
                        entry.observers == 0 && entry.value.is_none()
                    }
                    None => false,
                };
                if orphaned {
                    state.entries.remove(&key);
                }
            }
        })
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.get(key).is_some_and(|e| e.stale)
    }

    /// Keys currently marked stale
    pub fn stale_keys(&self) -> Vec<CacheKey> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Total entries marked stale since creation
    pub fn invalidation_count(&self) -> usize {
        self.state.lock().invalidations
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.state.lock().entries.get(key).and_then(|e| e.value.clone())
    }

    fn set(&self, key: &CacheKey, value: Value) {
        let mut state = self.state.lock();
        let entry = state.entries.entry(key.clone()).or_default();
        entry.value = Some(value);
        entry.stale = false;
    }

    fn remove(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        let observed = state.entries.get(key).is_some_and(|e| e.observers > 0);
        if observed {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.value = None;
            }
        } else {
            state.entries.remove(key);
        }
    }

    fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.state.lock().mark_stale(|key, _| key.starts_with(prefix))
    }

    fn invalidate_all(&self) -> usize {
        self.state.lock().mark_stale(|_, _| true)
    }

    fn invalidate_observed(&self) -> usize {
        self.state.lock().mark_stale(|_, entry| entry.observers > 0)
    }
}
