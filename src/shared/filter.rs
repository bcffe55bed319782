//! Row filters
//!
//! Subscriptions can narrow a resource with a PostgREST-style filter string
//! `column=op.value`, e.g. `content_id=eq.42` or `status=in.(open,pending)`.
//! The backend evaluates the filter; [`RowFilter::matches`] implements the
//! same rules for in-process transports.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::shared::error::RealtimeError;

/// Comparison operator of a row filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

/// Parsed `column=op.value` filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    /// Raw operand(s); one entry except for `in`
    pub values: Vec<String>,
}

impl RowFilter {
    /// Parse a filter string
    pub fn parse(input: &str) -> Result<Self, RealtimeError> {
        let (column, rest) = input
            .split_once('=')
            .ok_or_else(|| RealtimeError::config(format!("filter '{}' is missing '='", input)))?;
        let (op, operand) = rest.split_once('.').ok_or_else(|| {
            RealtimeError::config(format!("filter '{}' is missing an operator", input))
        })?;

        let column = column.trim();
        if column.is_empty() {
            return Err(RealtimeError::config(format!("filter '{}' has no column", input)));
        }

        let op = match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            other => {
                return Err(RealtimeError::config(format!(
                    "unsupported filter operator '{}'",
                    other
                )))
            }
        };

        let values = if op == FilterOp::In {
            let inner = operand
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| {
                    RealtimeError::config(format!("'in' filter needs (a,b,..), got '{}'", operand))
                })?;
            inner
                .split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|v| !v.is_empty())
                .collect()
        } else {
            vec![operand.to_string()]
        };

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }

    /// Evaluate against a row. Missing columns never match.
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field) = record.get(&self.column) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => self.values.first().is_some_and(|v| compare(field, v) == Some(Ordering::Equal)),
            FilterOp::Neq => self.values.first().is_some_and(|v| compare(field, v) != Some(Ordering::Equal)),
            FilterOp::Gt => self.values.first().is_some_and(|v| compare(field, v) == Some(Ordering::Greater)),
            FilterOp::Gte => self
                .values
                .first()
                .is_some_and(|v| matches!(compare(field, v), Some(Ordering::Greater | Ordering::Equal))),
            FilterOp::Lt => self.values.first().is_some_and(|v| compare(field, v) == Some(Ordering::Less)),
            FilterOp::Lte => self
                .values
                .first()
                .is_some_and(|v| matches!(compare(field, v), Some(Ordering::Less | Ordering::Equal))),
            FilterOp::In => self.values.iter().any(|v| compare(field, v) == Some(Ordering::Equal)),
        }
    }
}

/// Compare a JSON field with a textual operand
fn compare(field: &Value, operand: &str) -> Option<Ordering> {
    match field {
        Value::Number(n) => {
            let lhs = n.as_f64()?;
            let rhs: f64 = operand.parse().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Value::String(s) => Some(s.as_str().cmp(operand)),
        Value::Bool(b) => {
            let rhs: bool = operand.parse().ok()?;
            Some(b.cmp(&rhs))
        }
        Value::Null => (operand == "null").then_some(Ordering::Equal),
        _ => None,
    }
}

impl FromStr for RowFilter {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == FilterOp::In {
            write!(f, "{}=in.({})", self.column, self.values.join(","))
        } else {
            write!(f, "{}={}.{}", self.column, self.op.as_str(), self.values.join(""))
        }
    }
}
