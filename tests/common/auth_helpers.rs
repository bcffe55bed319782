//! Authentication test helpers
//!
//! Test accounts for the in-memory auth backend.

use community_realtime::realtime::auth::{MemoryAuthBackend, Profile};

/// Test user credentials
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub password: String,
}

/// Register a member account with a profile
pub fn create_test_user(backend: &MemoryAuthBackend, email: &str, role: &str) -> TestUser {
    let password = "password123".to_string();
    let username = email.split('@').next().unwrap_or(email).to_string();
    let profile = Profile::new("pending").with_role(role).with_username(username);
    let id = backend.add_account(email, &password, Some(profile));
    TestUser {
        id,
        email: email.to_string(),
        password,
    }
}
