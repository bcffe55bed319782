//! Connection lifecycle tests
//!
//! Retry ceiling, manual recovery from exhaustion and heartbeat loss.

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use community_realtime::realtime::connection::ConnectionState;
use community_realtime::shared::LifecycleSignal;

use crate::common::{settle, TestCore};

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_ceiling() {
    let test = TestCore::new();
    test.transport.refuse_connections(true);

    crate::assert_err!(test.core.start().await);
    tokio::time::sleep(Duration::from_secs(300)).await;

    let status = test.core.get_connection_status();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.reconnect_attempts, 5);
    assert_eq!(test.transport.connect_attempts(), 6);
    assert!(test.core.connection().is_retry_exhausted());

    // Nothing else happens without a manual trigger
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(test.transport.connect_attempts(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_manual_recovery_after_exhaustion() {
    let test = TestCore::new();
    test.transport.refuse_connections(true);
    let _ = test.core.start().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(test.core.connection().is_retry_exhausted());

    test.transport.refuse_connections(false);
    let outcome = test.core.manual_recovery().await;

    let report = outcome.report().expect("recovery should run");
    assert_eq!(report.error, None);
    assert!(test.core.get_connection_status().is_connected());
    assert_eq!(test.core.get_connection_status().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_automatically() {
    let test = TestCore::new();
    test.transport.fail_next_connects(2);

    let _ = test.core.start().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(test.core.get_connection_status().is_connected());
    assert_eq!(test.transport.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_loss_reconnects_and_resubscribes() {
    let test = TestCore::started().await;
    let _sub = crate::assert_ok!(test.core.subscribe(
        community_realtime::realtime::subscription::SubscriptionConfig::new("posts", "posts", |_| Ok(()))
    ));
    assert_eq!(test.transport.channel_count(), 1);

    test.transport.fail_heartbeats(true);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(test.core.get_connection_status().state, ConnectionState::Error);

    test.transport.fail_heartbeats(false);
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert!(test.core.get_connection_status().is_connected());
    assert!(test.core.registry().is_subscribed("posts"));
    assert_eq!(test.transport.channel_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_listener_sees_transitions() {
    let test = TestCore::new();
    let changes = Arc::new(AtomicU32::new(0));
    let counter = changes.clone();
    let watch = test.core.subscribe_to_connection_status(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    crate::assert_ok!(test.core.start().await);
    // Connecting, Connected
    assert_eq!(changes.load(Ordering::SeqCst), 2);

    watch.unsubscribe();
    test.core.handle_lifecycle(LifecycleSignal::Offline).await;
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_token_reaches_transport() {
    let test = TestCore::new();
    let user = crate::common::create_test_user(&test.backend, "mod@example.com", "moderator");

    let session = crate::assert_ok!(test.core.auth().sign_in(&user.email, &user.password).await);
    crate::assert_ok!(test.core.start().await);

    assert_eq!(session.user.id, user.id);
    assert_eq!(test.transport.access_token(), Some(session.access_token));
    assert!(test.core.auth().has_role(&["moderator"]));

    crate::assert_ok!(test.core.auth().sign_out().await);
    assert_eq!(test.transport.access_token(), None);
    assert!(!test.core.get_auth_state().is_authenticated());
}
