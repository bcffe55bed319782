//! Realtime configuration module
//!
//! Provides the configuration tree for the realtime core. Every value has a
//! default, so `RealtimeConfig::default()` is a working configuration for a
//! local backend.
//!
//! # Sources
//!
//! - [`RealtimeConfig::builder`] for programmatic setup
//! - [`RealtimeConfig::from_toml_str`] / [`RealtimeConfig::load_from_file`]
//! - [`RealtimeConfig::apply_env`] for `REALTIME_*` overrides (a `.env` file is
//!   loaded first when present)
//!
//! # Example
//!
//! ```toml
//! server_url = "https://community.example.org"
//! api_key = "anon-key"
//!
//! [connection]
//! max_reconnect_attempts = 8
//! heartbeat_interval_ms = 15000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default backend URL used for local development
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:54321";

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "community-realtime";

/// File name looked up by [`RealtimeConfig::default_path`]
const CONFIG_FILE_NAME: &str = "realtime.toml";

/// Connection manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Base reconnect interval; doubled per attempt
    pub base_reconnect_interval_ms: u64,
    /// Upper bound for a single backoff delay
    pub max_reconnect_delay_ms: u64,
    /// Automatic retries stop once this many attempts have failed
    pub max_reconnect_attempts: u32,
    /// Liveness probe period
    pub heartbeat_interval_ms: u64,
    /// Fraction of the delay added as random jitter (0.0 disables it)
    pub jitter_factor: f64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            base_reconnect_interval_ms: 3_000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl ConnectionSettings {
    pub fn base_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_interval_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Subscription registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// Time a channel has to confirm before it is marked errored
    pub subscribe_timeout_ms: u64,
    /// Polls of `is_live()` before a resubscribe pass gives up
    pub resubscribe_poll_attempts: u32,
    /// First poll delay; doubled per poll
    pub resubscribe_poll_initial_ms: u64,
    /// Cap for a single poll delay
    pub resubscribe_poll_max_ms: u64,
    /// Pause between tearing channels down and re-creating them
    pub resubscribe_settle_ms: u64,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            subscribe_timeout_ms: 10_000,
            resubscribe_poll_attempts: 10,
            resubscribe_poll_initial_ms: 100,
            resubscribe_poll_max_ms: 5_000,
            resubscribe_settle_ms: 100,
        }
    }
}

impl SubscriptionSettings {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn resubscribe_poll_initial(&self) -> Duration {
        Duration::from_millis(self.resubscribe_poll_initial_ms)
    }

    pub fn resubscribe_poll_max(&self) -> Duration {
        Duration::from_millis(self.resubscribe_poll_max_ms)
    }

    pub fn resubscribe_settle(&self) -> Duration {
        Duration::from_millis(self.resubscribe_settle_ms)
    }
}

/// Auth session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Profile cache entry lifetime
    pub profile_ttl_ms: u64,
    /// How long before token expiry the refresh fires
    pub refresh_margin_ms: u64,
    /// Lower bound for the refresh delay
    pub min_refresh_delay_ms: u64,
    /// Table holding user profiles
    pub profile_table: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            profile_ttl_ms: 30 * 60 * 1_000,
            refresh_margin_ms: 10 * 60 * 1_000,
            min_refresh_delay_ms: 60 * 1_000,
            profile_table: "profiles".to_string(),
        }
    }
}

impl AuthSettings {
    pub fn profile_ttl(&self) -> Duration {
        Duration::from_millis(self.profile_ttl_ms)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_millis(self.refresh_margin_ms)
    }

    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.min_refresh_delay_ms)
    }
}

/// Recovery orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Delay absorbing rapid lifecycle flapping
    pub debounce_ms: u64,
    /// Hidden longer than this triggers full recovery
    pub full_recovery_threshold_ms: u64,
    /// How long recovery waits for an in-flight connect
    pub connect_wait_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            full_recovery_threshold_ms: 30_000,
            connect_wait_ms: 10_000,
        }
    }
}

impl RecoverySettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn full_recovery_threshold(&self) -> Duration {
        Duration::from_millis(self.full_recovery_threshold_ms)
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }
}

/// Realtime core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Backend base URL (auth + REST)
    pub server_url: String,
    /// Public API key sent as `apikey`
    pub api_key: Option<String>,
    pub connection: ConnectionSettings,
    pub subscriptions: SubscriptionSettings,
    pub auth: AuthSettings,
    pub recovery: RecoverySettings,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: None,
            connection: ConnectionSettings::default(),
            subscriptions: SubscriptionSettings::default(),
            auth: AuthSettings::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

impl RealtimeConfig {
    /// Create a new RealtimeConfigBuilder
    pub fn builder() -> RealtimeConfigBuilder {
        RealtimeConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// `<config dir>/community-realtime/realtime.toml`, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default path when it exists, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("[Config] Loading {}", path.display());
                Self::load_from_file(path)?
            }
            _ => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `REALTIME_*` environment overrides.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        dotenv::dotenv().ok();

        if let Ok(url) = std::env::var("REALTIME_URL") {
            self.server_url = url;
        }
        if let Ok(key) = std::env::var("REALTIME_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(raw) = std::env::var("REALTIME_MAX_RECONNECT_ATTEMPTS") {
            self.connection.max_reconnect_attempts =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "REALTIME_MAX_RECONNECT_ATTEMPTS",
                    message: format!("expected an integer, got '{}'", raw),
                })?;
        }
        if let Ok(raw) = std::env::var("REALTIME_HEARTBEAT_MS") {
            self.connection.heartbeat_interval_ms =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "REALTIME_HEARTBEAT_MS",
                    message: format!("expected milliseconds, got '{}'", raw),
                })?;
        }
        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }
        if self.connection.max_reconnect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.max_reconnect_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if self.connection.base_reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.base_reconnect_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.connection.max_reconnect_delay_ms < self.connection.base_reconnect_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "connection.max_reconnect_delay_ms",
                message: "must not be smaller than the base interval".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.connection.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "connection.jitter_factor",
                message: "must be within 0.0..=1.0".to_string(),
            });
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.heartbeat_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.subscriptions.resubscribe_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "subscriptions.resubscribe_poll_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for RealtimeConfig
#[derive(Debug, Default)]
pub struct RealtimeConfigBuilder {
    config: RealtimeConfig,
}

impl RealtimeConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    /// Set the public API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn connection(mut self, settings: ConnectionSettings) -> Self {
        self.config.connection = settings;
        self
    }

    pub fn subscriptions(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscriptions = settings;
        self
    }

    pub fn auth(mut self, settings: AuthSettings) -> Self {
        self.config.auth = settings;
        self
    }

    pub fn recovery(mut self, settings: RecoverySettings) -> Self {
        self.config.recovery = settings;
        self
    }

    /// Shorthand for the retry ceiling
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.connection.max_reconnect_attempts = attempts;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RealtimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
}
