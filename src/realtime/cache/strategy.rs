//! Cache update strategies.
//!
//! The list helpers here are pure: they take the cached value and a change
//! event and return the new value, or `None` when nothing changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::event::{ChangeEvent, ChangeType};

/// How a change event is applied to the cached values it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Mark the keys stale so their owners refetch
    #[default]
    Invalidate,
    /// Apply the row diff in place
    Merge,
    /// Overwrite the entry with the new row
    Replace,
    /// Strip deleted rows from lists
    Remove,
}

/// Identity of a row as a comparable string
fn row_id(row: &Value, id_field: &str) -> Option<String> {
    match row.get(id_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn same_row(candidate: &Value, id: &str, id_field: &str) -> bool {
    row_id(candidate, id_field).as_deref() == Some(id)
}

/// Apply `event` to a cached value.
///
/// Lists: inserts append unless the id is already present, updates replace
/// the matching element, deletes drop it. Non-list values are replaced
/// wholesale on update.
pub fn merge(current: &Value, event: &ChangeEvent, id_field: &str) -> Option<Value> {
    match current {
        Value::Array(items) => {
            let id = event.record().and_then(|r| row_id(r, id_field))?;
            match event.event_type {
                ChangeType::Insert => {
                    let new = event.new.as_ref()?;
                    if items.iter().any(|item| same_row(item, &id, id_field)) {
                        return None;
                    }
                    let mut next = items.clone();
                    next.push(new.clone());
                    Some(Value::Array(next))
                }
                ChangeType::Update => {
                    let new = event.new.as_ref()?;
                    let position = items.iter().position(|item| same_row(item, &id, id_field))?;
                    let mut next = items.clone();
                    next[position] = new.clone();
                    Some(Value::Array(next))
                }
                ChangeType::Delete => remove_from_list(current, event, id_field),
            }
        }
        _ if event.event_type == ChangeType::Update => event.new.clone(),
        _ => None,
    }
}

/// Drop the deleted row from a cached list
pub fn remove_from_list(current: &Value, event: &ChangeEvent, id_field: &str) -> Option<Value> {
    if event.event_type != ChangeType::Delete {
        return None;
    }
    let Value::Array(items) = current else {
        return None;
    };
    let id = event.old.as_ref().and_then(|r| row_id(r, id_field))?;
    let next: Vec<Value> = items
        .iter()
        .filter(|item| !same_row(item, &id, id_field))
        .cloned()
        .collect();
    (next.len() != items.len()).then_some(Value::Array(next))
}
