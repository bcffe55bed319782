//! Community Realtime - Connection and Subscription Sync Core
//!
//! Client-side realtime layer for a community application: it keeps one
//! connection to the backend realtime service alive, multiplexes named
//! change subscriptions over it, keeps the auth session fresh, mirrors
//! change events into a query cache and recovers after the host was
//! suspended or lost its network.
//!
//! # Module Structure
//!
//! - **`shared`** - Platform-agnostic types
//!   - Error enum, configuration tree
//!   - Change events, lifecycle signals, row filters
//!
//! - **`realtime`** - The stateful core
//!   - `connection` - connection state machine, backoff, heartbeat
//!   - `subscription` - subscription registry and resubscribe passes
//!   - `auth` - session/token lifecycle and profile cache
//!   - `cache` - cache-sync bridge and liveness filtering
//!   - `recovery` - recovery orchestrator
//!   - `transport` - backend transport seam and in-memory transport
//!   - `lifecycle` - host signal de-duplication
//!
//! - **`telemetry`** - tracing subscriber setup (feature `telemetry`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use community_realtime::realtime::auth::HttpAuthBackend;
//! use community_realtime::realtime::cache::MemoryCache;
//! use community_realtime::realtime::subscription::SubscriptionConfig;
//! use community_realtime::realtime::transport::MemoryTransport;
//! use community_realtime::realtime::RealtimeCore;
//! use community_realtime::shared::RealtimeConfig;
//!
//! # async fn example() -> community_realtime::shared::Result<()> {
//! let config = RealtimeConfig::load()?;
//! let core = RealtimeCore::new(
//!     config.clone(),
//!     Arc::new(MemoryTransport::new()),
//!     Arc::new(HttpAuthBackend::new(&config)),
//!     Arc::new(MemoryCache::new()),
//! );
//! core.start().await?;
//!
//! let _comments = core.subscribe(
//!     SubscriptionConfig::new("comments-42", "comments", |event| {
//!         println!("{:?}", event.new);
//!         Ok(())
//!     })
//!     .filter("content_id=eq.42"),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Every component is `Send + Sync` and shared through `Arc`. State lives
//! behind `parking_lot::Mutex` locks that are never held across an
//! `.await`; listeners are called after the lock is released.

/// Shared types and data structures
pub mod shared;

/// Connection, subscription, auth, cache and recovery components
pub mod realtime;

/// Tracing setup
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use realtime::RealtimeCore;
pub use shared::{RealtimeConfig, RealtimeError, Result};
