//! Shared Error Types
//!
//! This module defines the error type used across the realtime core. Every
//! component (connection, subscriptions, auth, cache sync, recovery) reports
//! failures through [`RealtimeError`] so collaborators only match on one enum.
//!
//! # Error Categories
//!
//! - `Connection` - network unreachable, handshake failure, heartbeat miss
//! - `Timeout` - an operation did not finish within its deadline
//! - `Subscription` - channel error or channel timeout
//! - `Auth` - session, token refresh or credential failures
//! - `Transport` - the underlying realtime client rejected a request
//! - `Callback` - a collaborator callback returned an error or panicked
//! - `Config` - invalid configuration values
//! - `Serialization` - JSON encode/decode failures
//! - `Http` - HTTP-level failures from the auth backend
//!
//! # Usage
//!
//! ```rust
//! use community_realtime::shared::error::RealtimeError;
//!
//! let error = RealtimeError::connection("socket closed");
//! assert!(error.is_retryable());
//! ```
//!
//! # Thread Safety
//!
//! `RealtimeError` is `Send + Sync + Clone`; it is stored inside status
//! snapshots that are handed to listeners on any thread.
use thiserror::Error;

use crate::shared::config::ConfigError;

/// Boxed error returned by collaborator callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors produced by the realtime core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// Connection could not be established or was lost
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timeout after {after_ms}ms: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline in milliseconds
        after_ms: u64,
    },

    /// Channel-level subscription failure
    #[error("Subscription '{id}' failed: {message}")]
    Subscription {
        /// Subscription identifier
        id: String,
        /// Human-readable error message
        message: String,
    },

    /// Session or credential failure
    #[error("Auth error: {message}")]
    Auth {
        /// Human-readable error message
        message: String,
    },

    /// Realtime transport rejected a request
    #[error("Transport error: {message}")]
    Transport {
        /// Human-readable error message
        message: String,
    },

    /// A collaborator callback failed
    #[error("Callback for '{id}' failed: {message}")]
    Callback {
        /// Subscription or sync identifier the callback belongs to
        id: String,
        /// Human-readable error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// HTTP failure from a REST endpoint
    #[error("HTTP error{}: {message}", status_suffix(.status))]
    Http {
        /// Status code when the server answered
        status: Option<u16>,
        /// Human-readable error message
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {}", s)).unwrap_or_default()
}

impl RealtimeError {
    /// Create a new connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Create a new subscription error
    pub fn subscription(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new callback error
    pub fn callback(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Callback {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new HTTP error
    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Whether the connection layer should retry after this error.
    ///
    /// Server-side HTTP failures (5xx) and transport hiccups are retryable;
    /// client errors, auth failures and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Http { status, .. } => status.map_or(true, |s| s >= 500),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::http(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

impl From<ConfigError> for RealtimeError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
