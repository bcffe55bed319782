//! Configuration loading tests
//!
//! Environment-variable tests mutate process state and run serially.

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

use community_realtime::shared::{ConfigError, RealtimeConfig};

const ENV_VARS: [&str; 4] = [
    "REALTIME_URL",
    "REALTIME_API_KEY",
    "REALTIME_MAX_RECONNECT_ATTEMPTS",
    "REALTIME_HEARTBEAT_MS",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

#[test]
fn test_load_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
server_url = "https://community.example.com"

[connection]
max_reconnect_attempts = 8
heartbeat_interval_ms = 15000

[recovery]
full_recovery_threshold_ms = 60000
"#
    )
    .unwrap();

    let config = crate::assert_ok!(RealtimeConfig::load_from_file(file.path()));
    assert_eq!(config.server_url, "https://community.example.com");
    assert_eq!(config.connection.max_reconnect_attempts, 8);
    assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(15));
    assert_eq!(config.recovery.full_recovery_threshold(), Duration::from_secs(60));
    // Untouched sections keep their defaults
    assert_eq!(config.auth.profile_ttl(), Duration::from_secs(30 * 60));
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("realtime.toml");
    std::fs::write(&path, "[connection]\nmax_reconnect_attempts = 0\n").unwrap();

    crate::assert_err!(
        RealtimeConfig::load_from_file(&path),
        ConfigError::InvalidValue { field: "connection.max_reconnect_attempts", .. }
    );
    crate::assert_err!(
        RealtimeConfig::load_from_file(dir.path().join("missing.toml")),
        ConfigError::Io { .. }
    );
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    std::env::set_var("REALTIME_URL", "https://env.example.com");
    std::env::set_var("REALTIME_API_KEY", "env-key");
    std::env::set_var("REALTIME_MAX_RECONNECT_ATTEMPTS", "3");
    std::env::set_var("REALTIME_HEARTBEAT_MS", "5000");

    let mut config = RealtimeConfig::default();
    let applied = config.apply_env();
    clear_env();

    crate::assert_ok!(applied);
    assert_eq!(config.server_url, "https://env.example.com");
    assert_eq!(config.api_key.as_deref(), Some("env-key"));
    assert_eq!(config.connection.max_reconnect_attempts, 3);
    assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(5));
}

#[test]
#[serial]
fn test_malformed_environment_value() {
    clear_env();
    std::env::set_var("REALTIME_MAX_RECONNECT_ATTEMPTS", "many");

    let mut config = RealtimeConfig::default();
    let applied = config.apply_env();
    clear_env();

    crate::assert_err!(
        applied,
        ConfigError::InvalidValue { field: "REALTIME_MAX_RECONNECT_ATTEMPTS", .. }
    );
}
