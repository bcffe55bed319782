//! Single-entry profile cache with a TTL.
//!
//! Holds the signed-in user's profile. An entry is served only while it is
//! younger than the TTL and belongs to the requested user.

use std::time::Duration;
use tokio::time::Instant;

use super::backend::Profile;

#[derive(Debug, Clone)]
struct CachedProfile {
    user_id: String,
    profile: Profile,
    fetched_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ProfileCache {
    ttl: Duration,
    entry: Option<CachedProfile>,
}

impl ProfileCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Cached profile for `user_id` if still fresh
    pub fn get(&self, user_id: &str) -> Option<Profile> {
        self.entry
            .as_ref()
            .filter(|e| e.user_id == user_id && e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.profile.clone())
    }

    pub fn put(&mut self, user_id: &str, profile: Profile) {
        self.entry = Some(CachedProfile {
            user_id: user_id.to_string(),
            profile,
            fetched_at: Instant::now(),
        });
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
