//! In-memory core fixtures
//!
//! Builds a [`RealtimeCore`] over the loopback transport, the in-memory auth
//! backend and the in-memory cache so scenarios can drive every component
//! without a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use community_realtime::realtime::auth::MemoryAuthBackend;
use community_realtime::realtime::cache::MemoryCache;
use community_realtime::realtime::subscription::SubscriptionConfig;
use community_realtime::realtime::transport::MemoryTransport;
use community_realtime::shared::{ChangeEvent, RealtimeConfig};
use community_realtime::RealtimeCore;

pub struct TestCore {
    pub transport: Arc<MemoryTransport>,
    pub backend: Arc<MemoryAuthBackend>,
    pub cache: Arc<MemoryCache>,
    pub core: RealtimeCore,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(RealtimeConfig::default())
    }

    pub fn with_config(config: RealtimeConfig) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let backend = Arc::new(MemoryAuthBackend::new());
        let cache = Arc::new(MemoryCache::new());
        let core = RealtimeCore::new(config, transport.clone(), backend.clone(), cache.clone());
        Self {
            transport,
            backend,
            cache,
            core,
        }
    }

    /// Start the core and let the initial resubscribe pass settle
    pub async fn started() -> Self {
        let test = Self::new();
        test.core.start().await.expect("core should connect");
        settle().await;
        test
    }
}

/// Let spawned resubscribe passes finish (paused clock)
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
}

/// Records every event a subscription receives
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
    calls: Arc<AtomicUsize>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self, id: &str, resource: &str) -> SubscriptionConfig {
        let log = self.clone();
        SubscriptionConfig::new(id, resource, move |event| {
            log.calls.fetch_add(1, Ordering::SeqCst);
            log.events.lock().expect("event log poisoned").push(event.clone());
            Ok(())
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }
}
