/**
 * Tracing setup
 *
 * Installs a `tracing_subscriber::fmt` subscriber filtered by `RUST_LOG`,
 * falling back to `default_filter` when the variable is unset or invalid.
 */
use tracing_subscriber::EnvFilter;

use crate::shared::error::{RealtimeError, Result};

/// Install the global subscriber.
///
/// Fails instead of panicking when another subscriber is already installed
/// (e.g. by the host application or a previous test).
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| RealtimeError::config(format!("tracing already initialised: {}", err)))?;

    tracing::debug!("[Telemetry] Tracing initialised");
    Ok(())
}
