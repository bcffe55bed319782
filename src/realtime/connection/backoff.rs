//! # Reconnect Backoff
//!
//! Delay calculation for automatic reconnects.
//!
//! ## Strategies
//!
//! - **Fixed**: same interval for every attempt
//! - **Exponential**: `min(base * 2^attempts, cap)` plus optional jitter
//! - **Custom**: caller-supplied function of the attempt count
//!
//! Jitter is a random fraction of the delay added on top, then the result is
//! clamped to the cap again so the ceiling always holds.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::shared::config::ConnectionSettings;

/// Backoff strategy configuration
#[derive(Clone)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        interval: Duration,
    },
    /// Exponential backoff with jitter
    Exponential {
        /// Delay before the first retry
        base: Duration,
        /// Upper bound for any delay
        cap: Duration,
        /// Jitter factor (0.0 to 1.0)
        jitter: f64,
    },
    /// Custom backoff function
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl BackoffStrategy {
    /// Exponential strategy from connection settings
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::Exponential {
            base: settings.base_reconnect_interval(),
            cap: settings.max_reconnect_delay(),
            jitter: settings.jitter_factor,
        }
    }

    /// Delay before the retry that follows `attempts` failed attempts, without jitter
    pub fn base_delay(&self, attempts: u32) -> Duration {
        match self {
            Self::Fixed { interval } => *interval,
            Self::Exponential { base, cap, .. } => {
                let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(*cap)
            }
            Self::Custom(calc) => calc(attempts),
        }
    }

    /// Delay before the retry that follows `attempts` failed attempts
    pub fn delay(&self, attempts: u32) -> Duration {
        let delay = self.base_delay(attempts);
        match self {
            Self::Exponential { cap, jitter, .. } if *jitter > 0.0 => {
                let extra = delay.mul_f64(rand::rng().random_range(0.0..=*jitter));
                delay.saturating_add(extra).min(*cap)
            }
            _ => delay,
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::from_settings(&ConnectionSettings::default())
    }
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { interval } => f.debug_struct("Fixed").field("interval", interval).finish(),
            Self::Exponential { base, cap, jitter } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("cap", cap)
                .field("jitter", jitter)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
