//! Liveness-only update detection.
//!
//! Presence writes (`last_seen_at`, `last_active_at`, ...) produce `UPDATE`
//! events that change nothing a reader cares about. A [`LivenessFilter`]
//! recognises them so the bridge can drop them before touching the cache.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::shared::event::{ChangeEvent, ChangeType};

/// Predicate over `(old, new)` rows; `true` means liveness-only
pub type LivenessPredicate = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum LivenessFilter {
    /// Only these fields matter; unchanged means liveness-only
    SignificantFields(Vec<String>),
    /// Every field except these matters
    IgnoredFields(Vec<String>),
    Custom(LivenessPredicate),
}

impl LivenessFilter {
    pub fn significant<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SignificantFields(fields.into_iter().map(Into::into).collect())
    }

    pub fn ignoring<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::IgnoredFields(fields.into_iter().map(Into::into).collect())
    }

    /// Whether `event` is an update that only touched liveness fields.
    ///
    /// Needs both `old` and `new`; anything else is treated as significant.
    pub fn is_liveness_only(&self, event: &ChangeEvent) -> bool {
        if event.event_type != ChangeType::Update {
            return false;
        }
        let (Some(old), Some(new)) = (&event.old, &event.new) else {
            return false;
        };

        match self {
            Self::SignificantFields(fields) => fields.iter().all(|f| old.get(f) == new.get(f)),
            Self::IgnoredFields(ignored) => {
                let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
                    return false;
                };
                old.keys()
                    .chain(new.keys())
                    .filter(|key| !ignored.iter().any(|i| i == *key))
                    .all(|key| old.get(key) == new.get(key))
            }
            Self::Custom(predicate) => predicate(old, new),
        }
    }
}

impl fmt::Debug for LivenessFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignificantFields(fields) => f.debug_tuple("SignificantFields").field(fields).finish(),
            Self::IgnoredFields(fields) => f.debug_tuple("IgnoredFields").field(fields).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
