//! Cache sync scenarios through the core

use pretty_assertions::assert_eq;
use serde_json::json;

use community_realtime::realtime::cache::{CacheKey, CacheStore, LivenessFilter, SyncConfig, SyncStrategy};
use community_realtime::shared::{ChangeEvent, EventFilter};

use crate::common::TestCore;

fn user_sync() -> SyncConfig {
    SyncConfig::new("users", SyncStrategy::Invalidate, |event| {
        let id = event
            .field("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        vec![CacheKey::new(["profile".to_string(), id])]
    })
    .event(EventFilter::Update)
    .dependent_keys(|_| vec![CacheKey::from(["members"]), CacheKey::from(["directory"])])
    .liveness(LivenessFilter::significant(["name", "role", "department"]))
}

fn user_row(name: &str, last_seen: &str) -> serde_json::Value {
    json!({"id": "u1", "name": name, "role": "member", "department": "ops", "last_seen_at": last_seen})
}

#[tokio::test(start_paused = true)]
async fn test_presence_update_does_not_cascade() {
    let test = TestCore::started().await;
    for key in [["members"].as_slice(), ["directory"].as_slice(), ["profile", "u1"].as_slice()] {
        test.cache.set(&key.into(), json!({}));
    }
    let _sync = crate::assert_ok!(test.core.setup_cache_sync("users", user_sync()));

    test.transport.publish(
        "users",
        ChangeEvent::update(user_row("Ada", "10:00"), user_row("Ada", "10:05")),
    );
    assert_eq!(test.cache.invalidation_count(), 0);

    test.transport.publish(
        "users",
        ChangeEvent::update(user_row("Ada", "10:05"), user_row("Ada L.", "10:06")),
    );
    assert_eq!(test.cache.invalidation_count(), 3);
    assert!(test.cache.is_stale(&["members"].into()));
}

#[tokio::test(start_paused = true)]
async fn test_merge_insert_then_delete_round_trips() {
    let test = TestCore::started().await;
    let original = json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]);
    test.cache.set(&["posts"].into(), original.clone());
    let _sync = crate::assert_ok!(test.core.setup_cache_sync(
        "posts",
        SyncConfig::new("posts", SyncStrategy::Merge, |_| vec![CacheKey::from(["posts"])]),
    ));

    test.transport.publish("posts", ChangeEvent::insert(json!({"id": 3, "title": "c"})));
    assert_eq!(test.cache.get(&["posts"].into()).unwrap().as_array().unwrap().len(), 3);

    test.transport.publish("posts", ChangeEvent::delete(json!({"id": 3})));
    assert_eq!(test.cache.get(&["posts"].into()), Some(original));
}

#[tokio::test(start_paused = true)]
async fn test_filtered_sync_only_sees_its_rows() {
    let test = TestCore::started().await;
    test.cache.set(&["comments", "42"].into(), json!([]));
    let _sync = crate::assert_ok!(test.core.setup_cache_sync(
        "comments-42",
        SyncConfig::new("comments", SyncStrategy::Merge, |_| vec![CacheKey::from(["comments", "42"])])
            .filter("content_id=eq.42"),
    ));

    test.transport.publish("comments", ChangeEvent::insert(json!({"id": 1, "content_id": 42})));
    test.transport.publish("comments", ChangeEvent::insert(json!({"id": 2, "content_id": 99})));

    assert_eq!(
        test.cache.get(&["comments", "42"].into()),
        Some(json!([{"id": 1, "content_id": 42}]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_removed_sync_stops_updating() {
    let test = TestCore::started().await;
    test.cache.set(&["posts"].into(), json!([]));
    let sync = crate::assert_ok!(test.core.setup_cache_sync(
        "posts",
        SyncConfig::new("posts", SyncStrategy::Merge, |_| vec![CacheKey::from(["posts"])]),
    ));
    sync.unsubscribe();

    test.transport.publish("posts", ChangeEvent::insert(json!({"id": 1})));
    assert_eq!(test.cache.get(&["posts"].into()), Some(json!([])));
    assert!(test.core.cache_sync().sync_ids().is_empty());
}
