//! Integration tests
//!
//! Scenario tests driving the whole core through its public surface

mod auth_http_test;
mod cache_sync_test;
mod config_test;
mod connection_test;
mod recovery_test;
mod subscription_test;
