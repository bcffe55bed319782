//! Shared Module
//!
//! This module contains the platform-agnostic types used by every component
//! of the realtime core: the error enum, configuration tree, change events,
//! lifecycle signals and row filters. None of these types own tasks or locks.

/// Change events, event filters and lifecycle signals
pub mod event;

/// Shared error types
pub mod error;

/// Row filter parsing and matching
pub mod filter;

/// Realtime configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, RealtimeConfig, RealtimeConfigBuilder};
pub use error::{BoxError, RealtimeError, Result};
pub use event::{ChangeEvent, ChangeType, EventFilter, LifecycleSignal};
pub use filter::{FilterOp, RowFilter};
