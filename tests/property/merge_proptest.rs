//! Property-based tests for the merge strategy

use proptest::prelude::*;
use serde_json::{json, Value};

use community_realtime::realtime::cache::strategy::merge;
use community_realtime::shared::ChangeEvent;

fn list_of(ids: &[u32]) -> Value {
    Value::Array(ids.iter().map(|id| json!({"id": id, "title": format!("t{}", id)})).collect())
}

proptest! {
    #[test]
    fn test_insert_then_delete_restores_list(
        ids in prop::collection::btree_set(0u32..1000, 0..20),
        extra in 1000u32..2000,
    ) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let original = list_of(&ids);
        let record = json!({"id": extra, "title": "new"});

        let inserted = merge(&original, &ChangeEvent::insert(record.clone()), "id").unwrap();
        prop_assert_eq!(inserted.as_array().unwrap().len(), ids.len() + 1);

        let restored = merge(&inserted, &ChangeEvent::delete(record), "id").unwrap();
        prop_assert_eq!(restored, original);
    }

    #[test]
    fn test_insert_of_present_id_is_noop(ids in prop::collection::btree_set(0u32..1000, 1..20)) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let original = list_of(&ids);
        let duplicate = json!({"id": ids[0], "title": "dup"});

        prop_assert_eq!(merge(&original, &ChangeEvent::insert(duplicate), "id"), None);
    }

    #[test]
    fn test_update_keeps_length(ids in prop::collection::btree_set(0u32..1000, 1..20), pick in any::<prop::sample::Index>()) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let target = ids[pick.index(ids.len())];
        let original = list_of(&ids);
        let updated = json!({"id": target, "title": "changed"});

        let merged = merge(&original, &ChangeEvent::update(json!({"id": target}), updated.clone()), "id").unwrap();
        let items = merged.as_array().unwrap();
        prop_assert_eq!(items.len(), ids.len());
        prop_assert!(items.contains(&updated));
    }
}
