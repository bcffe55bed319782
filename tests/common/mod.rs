//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - In-memory core fixtures
//! - Mock GoTrue server helpers
//! - Test accounts
//! - Custom assertion macros

pub mod assertions;
pub mod auth_helpers;
pub mod fixtures;
pub mod mock_server;

// Re-export commonly used utilities
pub use auth_helpers::*;
pub use fixtures::*;
pub use mock_server::*;
