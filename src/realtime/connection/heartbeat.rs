//! Heartbeat liveness probing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::realtime::transport::RealtimeTransport;
use crate::shared::error::RealtimeError;

/// Outcome of the heartbeat loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// A probe failed; the connection should be treated as lost
    Failed(RealtimeError),
    /// The heartbeat was cancelled externally
    Cancelled,
}

/// Probe `transport` every `interval` until a probe fails or `cancel` fires.
///
/// The first probe runs one full interval after the call.
pub async fn run_heartbeat(
    transport: Arc<dyn RealtimeTransport>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            _ = ticker.tick() => {
                if let Err(err) = transport.heartbeat().await {
                    return HeartbeatOutcome::Failed(err);
                }
                tracing::trace!("[Connection] Heartbeat ok");
            }
        }
    }
}
