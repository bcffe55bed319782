//! # In-Memory Transport
//!
//! Loopback [`RealtimeTransport`] that behaves like a realtime backend living
//! in the same process: channels are joined and acknowledged, row filters are
//! evaluated "server side", and [`MemoryTransport::publish`] pushes change
//! events to matching channels.
//!
//! Failure scripting (`fail_next_connects`, `refuse_connections`,
//! `fail_heartbeats`, `drop_connection`) makes reconnect and recovery paths
//! reproducible without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ChannelId, ChannelSpec, ChannelState, EventSink, RealtimeTransport, StateSink};
use crate::shared::error::{RealtimeError, Result};
use crate::shared::event::ChangeEvent;

/// How channel joins are acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMode {
    /// Confirm immediately
    Auto,
    /// Leave channels joining until [`MemoryTransport::confirm_channel`]
    Manual,
    /// Reject every join with the given reason
    Reject(String),
}

struct MemoryChannel {
    spec: ChannelSpec,
    on_event: EventSink,
    on_state: StateSink,
    state: ChannelState,
}

struct MemoryState {
    live: bool,
    refuse_all: bool,
    failing_connects: u32,
    heartbeat_fails: bool,
    connect_delay: Duration,
    ack: AckMode,
    access_token: Option<String>,
    channels: BTreeMap<ChannelId, MemoryChannel>,
    next_channel_id: ChannelId,
    connect_attempts: usize,
    channels_opened: usize,
}

/// In-process realtime backend
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                live: false,
                refuse_all: false,
                failing_connects: 0,
                heartbeat_fails: false,
                connect_delay: Duration::ZERO,
                ack: AckMode::Auto,
                access_token: None,
                channels: BTreeMap::new(),
                next_channel_id: 1,
                connect_attempts: 0,
                channels_opened: 0,
            }),
        }
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// Fail every connect attempt until switched off
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    pub fn fail_heartbeats(&self, fail: bool) {
        self.state.lock().heartbeat_fails = fail;
    }

    /// Simulated handshake latency
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state.lock().ack = mode;
    }

    /// Server-side connection loss: the socket dies and every channel closes
    pub fn drop_connection(&self) {
        let closed = {
            let mut state = self.state.lock();
            state.live = false;
            std::mem::take(&mut state.channels)
        };
        for channel in closed.into_values() {
            (channel.on_state)(ChannelState::Closed);
        }
    }

    /// Acknowledge a joining channel
    pub fn confirm_channel(&self, id: ChannelId) -> bool {
        self.transition(id, ChannelState::Subscribed)
    }

    /// Acknowledge every joining channel; returns how many were confirmed
    pub fn confirm_pending(&self) -> usize {
        let pending: Vec<ChannelId> = self
            .state
            .lock()
            .channels
            .iter()
            .filter(|(_, c)| c.state == ChannelState::Joining)
            .map(|(id, _)| *id)
            .collect();
        pending.into_iter().filter(|id| self.confirm_channel(*id)).count()
    }

    /// Push a channel into the errored state
    pub fn error_channel(&self, id: ChannelId, reason: &str) -> bool {
        self.transition(id, ChannelState::Errored(reason.to_string()))
    }

    fn transition(&self, id: ChannelId, next: ChannelState) -> bool {
        let sink = {
            let mut state = self.state.lock();
            match state.channels.get_mut(&id) {
                Some(channel) => {
                    channel.state = next.clone();
                    channel.on_state.clone()
                }
                None => return false,
            }
        };
        sink(next);
        true
    }

    /// Deliver `event` on `resource` to every subscribed, matching channel.
    ///
    /// Returns the number of channels the event was delivered to.
    pub fn publish(&self, resource: &str, event: ChangeEvent) -> usize {
        let sinks: Vec<EventSink> = {
            let state = self.state.lock();
            if !state.live {
                return 0;
            }
            state
                .channels
                .values()
                .filter(|c| c.state == ChannelState::Subscribed && c.spec.accepts(resource, &event))
                .map(|c| c.on_event.clone())
                .collect()
        };
        for sink in &sinks {
            sink(event.clone());
        }
        sinks.len()
    }

    /// Specs of the channels currently open, in id order
    pub fn open_channels(&self) -> Vec<ChannelSpec> {
        self.state.lock().channels.values().map(|c| c.spec.clone()).collect()
    }

    /// Ids of the channels currently open, in id order
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.state.lock().channels.keys().copied().collect()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Total connect calls, successful or not
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Total channels ever opened
    pub fn channels_opened(&self) -> usize {
        self.state.lock().channels_opened
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().access_token.clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    async fn connect(&self, access_token: Option<String>) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.refuse_all {
            return Err(RealtimeError::connection("connection refused"));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RealtimeError::connection("connection refused"));
        }
        state.live = true;
        state.access_token = access_token;
        Ok(())
    }

    async fn disconnect(&self) {
        let closed = {
            let mut state = self.state.lock();
            state.live = false;
            std::mem::take(&mut state.channels)
        };
        for channel in closed.into_values() {
            (channel.on_state)(ChannelState::Closed);
        }
    }

    fn is_live(&self) -> bool {
        self.state.lock().live
    }

    async fn heartbeat(&self) -> Result<()> {
        let state = self.state.lock();
        if !state.live {
            return Err(RealtimeError::connection("transport is not live"));
        }
        if state.heartbeat_fails {
            return Err(RealtimeError::connection("heartbeat not acknowledged"));
        }
        Ok(())
    }

    fn set_auth(&self, access_token: Option<String>) {
        self.state.lock().access_token = access_token;
    }

    fn open_channel(
        &self,
        spec: ChannelSpec,
        on_event: EventSink,
        on_state: StateSink,
    ) -> Result<ChannelId> {
        let (id, ack) = {
            let mut state = self.state.lock();
            if !state.live {
                return Err(RealtimeError::transport("socket is not connected"));
            }
            let id = state.next_channel_id;
            state.next_channel_id += 1;
            state.channels_opened += 1;

            let initial = match &state.ack {
                AckMode::Auto => ChannelState::Subscribed,
                AckMode::Manual => ChannelState::Joining,
                AckMode::Reject(reason) => ChannelState::Errored(reason.clone()),
            };
            state.channels.insert(
                id,
                MemoryChannel {
                    spec,
                    on_event,
                    on_state: on_state.clone(),
                    state: initial.clone(),
                },
            );
            (id, initial)
        };

        if ack != ChannelState::Joining {
            on_state(ack);
        }
        Ok(id)
    }

    fn close_channel(&self, id: ChannelId) {
        self.state.lock().channels.remove(&id);
    }
}
