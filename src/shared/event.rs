/**
 * Change Event Types
 *
 * This module defines the row-change notifications delivered by the realtime
 * backend and the event filters a subscription can ask for.
 *
 * A change event is shaped `{eventType, new, old}`:
 * - `INSERT` carries `new`
 * - `UPDATE` carries `new` and (depending on replica identity) `old`
 * - `DELETE` carries `old`
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Insert => write!(f, "INSERT"),
            ChangeType::Update => write!(f, "UPDATE"),
            ChangeType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Which change types a subscription receives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EventFilter {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    /// Whether a change of `change_type` passes this filter
    pub fn accepts(&self, change_type: ChangeType) -> bool {
        matches!(
            (self, change_type),
            (EventFilter::All, _)
                | (EventFilter::Insert, ChangeType::Insert)
                | (EventFilter::Update, ChangeType::Update)
                | (EventFilter::Delete, ChangeType::Delete)
        )
    }
}

impl std::fmt::Display for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventFilter::Insert => write!(f, "INSERT"),
            EventFilter::Update => write!(f, "UPDATE"),
            EventFilter::Delete => write!(f, "DELETE"),
            EventFilter::All => write!(f, "*"),
        }
    }
}

/// A single row change pushed by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    /// Type of change
    #[serde(rename = "eventType")]
    pub event_type: ChangeType,
    /// Row after the change (absent for deletes)
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change (absent for inserts)
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Create an insert event
    pub fn insert(new: Value) -> Self {
        Self {
            event_type: ChangeType::Insert,
            new: Some(new),
            old: None,
        }
    }

    /// Create an update event
    pub fn update(old: Value, new: Value) -> Self {
        Self {
            event_type: ChangeType::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    /// Create a delete event
    pub fn delete(old: Value) -> Self {
        Self {
            event_type: ChangeType::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The row this event describes: `new` when present, otherwise `old`
    pub fn record(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Value of `field` on [`record`](Self::record)
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.record().and_then(|r| r.get(field))
    }
}

/// Raw host signals (browser-style page lifecycle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// Page/tab visibility changed
    Visibility { visible: bool },
    /// Network came back
    Online,
    /// Network went away
    Offline,
    /// Window gained focus
    Focus,
    /// Window lost focus
    Blur,
    /// Page shown; `persisted` is true when restored from the history cache
    PageShow { persisted: bool },
}
