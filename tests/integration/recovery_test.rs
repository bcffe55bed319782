//! Recovery scenarios driven through host lifecycle signals

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use community_realtime::realtime::cache::{CacheKey, CacheStore};
use community_realtime::realtime::recovery::{RecoveryOutcome, RecoverySource};
use community_realtime::shared::LifecycleSignal;

use crate::common::{settle, EventLog, TestCore};

const HIDDEN: LifecycleSignal = LifecycleSignal::Visibility { visible: false };
const VISIBLE: LifecycleSignal = LifecycleSignal::Visibility { visible: true };

fn seed_cache(test: &TestCore) -> community_realtime::realtime::listeners::Unsubscribe {
    test.cache.set(&["posts", "list"].into(), json!([]));
    test.cache.set(&["members"].into(), json!([]));
    test.cache.set(&["profile", "u1"].into(), json!({}));
    test.cache.observe(CacheKey::from(["posts", "list"]))
}

#[tokio::test(start_paused = true)]
async fn test_long_background_triggers_full_invalidation() {
    let test = TestCore::started().await;
    let _observer = seed_cache(&test);

    assert_eq!(test.core.handle_lifecycle(HIDDEN).await, None);
    tokio::time::sleep(Duration::from_secs(45)).await;
    let outcome = test.core.handle_lifecycle(VISIBLE).await;

    let report = assert_matches!(outcome, Some(RecoveryOutcome::Completed(report)) => report);
    assert!(report.full);
    assert_eq!(report.source, RecoverySource::Visibility);
    assert_eq!(test.cache.stale_keys().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_short_background_triggers_partial_invalidation() {
    let test = TestCore::started().await;
    let _observer = seed_cache(&test);

    test.core.handle_lifecycle(HIDDEN).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let outcome = test.core.handle_lifecycle(VISIBLE).await;

    let report = assert_matches!(outcome, Some(RecoveryOutcome::Completed(report)) => report);
    assert!(!report.full);
    assert_eq!(test.cache.stale_keys(), vec![CacheKey::from(["posts", "list"])]);
}

#[tokio::test(start_paused = true)]
async fn test_restored_page_runs_partial_recovery() {
    let test = TestCore::started().await;
    let _observer = seed_cache(&test);

    let outcome = test
        .core
        .handle_lifecycle(LifecycleSignal::PageShow { persisted: true })
        .await;
    let report = assert_matches!(outcome, Some(RecoveryOutcome::Completed(report)) => report);
    assert_eq!(report.source, RecoverySource::PageShow);
    assert!(!report.full);

    // A fresh page load is not a restore
    assert_eq!(
        test.core
            .handle_lifecycle(LifecycleSignal::PageShow { persisted: false })
            .await,
        None
    );
}

#[tokio::test(start_paused = true)]
async fn test_triggers_within_debounce_run_once() {
    let test = TestCore::started().await;
    let recovery = test.core.recovery();

    let (first, second) = tokio::join!(
        recovery.trigger_recovery(RecoverySource::Network, false),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            recovery.trigger_recovery(RecoverySource::Network, false).await
        }
    );

    assert_matches!(first, RecoveryOutcome::Completed(_));
    assert_eq!(second, RecoveryOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_offline_online_flapping_keeps_single_subscription() {
    let test = TestCore::started().await;
    let log = EventLog::new();
    let _sub = crate::assert_ok!(test.core.subscribe(log.subscription("feed", "posts")));
    let connects_before = test.transport.connect_attempts();

    let peak = Arc::new(AtomicU32::new(0));
    let observed = peak.clone();
    let _watch = test.core.subscribe_to_connection_status(move |status| {
        observed.fetch_max(status.reconnect_attempts, Ordering::SeqCst);
    });

    let channels_at_refetch = Arc::new(Mutex::new(Vec::new()));
    let recorded = channels_at_refetch.clone();
    let transport = test.transport.clone();
    let _refetch = test.core.recovery().register_callback("refetch", move |_| {
        recorded.lock().expect("refetch log poisoned").push(transport.channel_count());
        async { Ok(()) }.boxed()
    });

    test.core.handle_lifecycle(LifecycleSignal::Offline).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let restored = test.core.handle_lifecycle(LifecycleSignal::Online).await;
    assert_eq!(test.core.handle_lifecycle(LifecycleSignal::Online).await, None);
    settle().await;

    let report = assert_matches!(restored, Some(RecoveryOutcome::Completed(report)) => report);
    assert_eq!(report.resubscribed, Some(1));
    assert_eq!(*channels_at_refetch.lock().expect("refetch log poisoned"), vec![1]);
    crate::assert_in_range!(peak.load(Ordering::SeqCst), 0, 1);
    assert_eq!(test.transport.connect_attempts(), connects_before + 1);
    assert_eq!(test.transport.channel_count(), 1);
    assert_eq!(test.core.registry().len(), 1);

    test.transport
        .publish("posts", community_realtime::shared::ChangeEvent::insert(json!({"id": 1})));
    assert_eq!(log.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_focus_only_revalidates() {
    let test = TestCore::started().await;
    let _observer = seed_cache(&test);

    test.core.handle_lifecycle(LifecycleSignal::Blur).await;
    assert_eq!(test.core.handle_lifecycle(LifecycleSignal::Focus).await, None);
    assert!(test.core.recovery().last_report().is_none());
    assert!(test.cache.stale_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_host_stops_heartbeat() {
    let test = TestCore::started().await;
    test.core.handle_lifecycle(HIDDEN).await;

    // A dead socket goes unnoticed while hidden
    test.transport.fail_heartbeats(true);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(test.core.get_connection_status().is_connected());
    assert!(!test.core.get_connection_status().is_visible);
    assert!(!test.core.host_status().visible);
}
