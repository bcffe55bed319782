//! # Realtime Transport
//!
//! The seam between the core and the backend realtime client. A transport
//! owns one physical connection and multiplexes channels over it; each
//! channel is scoped to `{resource, event filter, row filter}`.
//!
//! Channel joins are acknowledged asynchronously through the `on_state`
//! sink passed to [`RealtimeTransport::open_channel`]. Liveness is a
//! first-class query ([`RealtimeTransport::is_live`]) instead of something
//! callers dig out of socket internals.
//!
//! [`memory::MemoryTransport`] is an in-process implementation used for
//! local development and tests.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::shared::error::{RealtimeError, Result};
use crate::shared::event::{ChangeEvent, EventFilter};
use crate::shared::filter::RowFilter;

pub use memory::{AckMode, MemoryTransport};

/// Identifier of an open channel, unique per transport
pub type ChannelId = u64;

/// Receives change events for one channel
pub type EventSink = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Receives channel state transitions for one channel
pub type StateSink = Arc<dyn Fn(ChannelState) + Send + Sync>;

/// What a channel listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    /// Channel topic, unique per subscription
    pub topic: String,
    pub resource: String,
    pub event: EventFilter,
    pub filter: Option<RowFilter>,
}

impl ChannelSpec {
    /// Whether `event` on `resource` should be routed to this channel
    pub fn accepts(&self, resource: &str, event: &ChangeEvent) -> bool {
        if self.resource != resource || !self.event.accepts(event.event_type) {
            return false;
        }
        match (&self.filter, event.record()) {
            (None, _) => true,
            (Some(filter), Some(record)) => filter.matches(record),
            (Some(_), None) => false,
        }
    }
}

/// Channel join state as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Joining,
    Subscribed,
    Errored(String),
    TimedOut,
    Closed,
}

/// Backend realtime client
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open the physical connection. `access_token` is `None` for anonymous access.
    async fn connect(&self, access_token: Option<String>) -> Result<()>;

    /// Close the physical connection and every channel on it
    async fn disconnect(&self);

    /// Whether the physical connection is currently open
    fn is_live(&self) -> bool;

    /// Lightweight liveness probe
    async fn heartbeat(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(RealtimeError::connection("transport is not live"))
        }
    }

    /// Replace the access token used for channel authorization
    fn set_auth(&self, _access_token: Option<String>) {}

    /// Start joining a channel; the join result arrives through `on_state`
    fn open_channel(&self, spec: ChannelSpec, on_event: EventSink, on_state: StateSink)
        -> Result<ChannelId>;

    /// Leave a channel. Unknown ids are ignored.
    fn close_channel(&self, id: ChannelId);
}
