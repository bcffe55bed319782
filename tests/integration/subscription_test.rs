//! Subscription registry tests
//!
//! Resubscribe set preservation and row-filter routing.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;

use community_realtime::realtime::subscription::{ResubscribeOutcome, SubscriptionSummary};
use community_realtime::shared::{ChangeEvent, EventFilter};

use crate::common::{settle, EventLog, TestCore};

fn summary_set(test: &TestCore) -> BTreeSet<(String, String, String, Option<String>)> {
    test.core
        .registry()
        .subscriptions()
        .into_iter()
        .map(|SubscriptionSummary { id, resource, event, filter }| (id, resource, format!("{:?}", event), filter))
        .collect()
}

async fn assert_resubscribe_preserves(count: usize) {
    let test = TestCore::started().await;
    let log = EventLog::new();
    let mut handles = Vec::new();
    for i in 0..count {
        let config = log
            .subscription(&format!("sub-{}", i), if i % 2 == 0 { "posts" } else { "comments" })
            .event(if i % 3 == 0 { EventFilter::Insert } else { EventFilter::All });
        let config = if i % 5 == 0 {
            config.filter(format!("content_id=eq.{}", i))
        } else {
            config
        };
        handles.push(crate::assert_ok!(test.core.subscribe(config)));
    }
    let before = summary_set(&test);
    let opened = test.transport.channels_opened();

    // Connection drop followed by a reconnect-triggered pass
    test.transport.drop_connection();
    crate::assert_ok!(test.core.connection().reconnect().await);
    settle().await;

    assert_eq!(summary_set(&test), before);
    assert_eq!(test.transport.channel_count(), count);
    assert_eq!(test.transport.channels_opened(), opened + count);

    // An explicit pass re-creates the same set again
    let outcome = crate::assert_ok!(test.core.registry().resubscribe_all().await);
    assert_eq!(outcome, ResubscribeOutcome::Completed(count));
    assert_eq!(summary_set(&test), before);
    assert_eq!(test.transport.channel_count(), count);
    assert_eq!(test.core.registry().len(), count);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_preserves_empty_set() {
    assert_resubscribe_preserves(0).await;
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_preserves_single_subscription() {
    assert_resubscribe_preserves(1).await;
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_preserves_fifty_subscriptions() {
    assert_resubscribe_preserves(50).await;
}

#[tokio::test(start_paused = true)]
async fn test_row_filter_routes_matching_rows_only() {
    let test = TestCore::started().await;
    let log = EventLog::new();
    let _sub = crate::assert_ok!(test
        .core
        .subscribe(log.subscription("comments-42", "comments").filter("content_id=eq.42")));

    let matching = ChangeEvent::insert(json!({"id": 1, "content_id": 42}));
    test.transport.publish("comments", matching.clone());
    test.transport.publish("comments", ChangeEvent::insert(json!({"id": 2, "content_id": 99})));

    assert_eq!(log.calls(), 1);
    assert_eq!(log.events(), vec![matching]);
}

#[tokio::test(start_paused = true)]
async fn test_callback_error_does_not_close_channel() {
    let test = TestCore::started().await;
    let errors = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = errors.clone();
    let config = community_realtime::realtime::subscription::SubscriptionConfig::new("flaky", "posts", |_| {
        Err("collaborator failed".into())
    })
    .on_error(move |_| {
        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    let _sub = crate::assert_ok!(test.core.subscribe(config));
    let log = EventLog::new();
    let _other = crate::assert_ok!(test.core.subscribe(log.subscription("steady", "posts")));

    test.transport.publish("posts", ChangeEvent::insert(json!({"id": 1})));
    test.transport.publish("posts", ChangeEvent::insert(json!({"id": 2})));

    assert_eq!(errors.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(log.calls(), 2);
    assert!(test.core.registry().is_subscribed("flaky"));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_channel_is_marked_errored() {
    use community_realtime::realtime::transport::AckMode;

    let test = TestCore::started().await;
    test.transport.set_ack_mode(AckMode::Manual);
    let log = EventLog::new();
    let _sub = crate::assert_ok!(test.core.subscribe(log.subscription("slow", "posts")));

    tokio::time::sleep(std::time::Duration::from_secs(11)).await;
    let status = test.core.registry().get_status("slow").expect("status");
    assert!(!status.is_subscribed);
    assert!(status.error.is_some());

    // Re-opened by the next revalidation once acknowledgements work again
    test.transport.set_ack_mode(AckMode::Auto);
    assert_eq!(test.core.registry().revalidate(), 1);
    settle().await;
    assert!(test.core.registry().is_subscribed("slow"));
}
