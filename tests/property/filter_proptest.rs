//! Property-based tests for row filter parsing and matching

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use community_realtime::shared::{FilterOp, RowFilter};

fn row(column: &str, value: i64) -> Value {
    let mut fields = Map::new();
    fields.insert(column.to_string(), json!(value));
    Value::Object(fields)
}

proptest! {
    #[test]
    fn test_eq_filter_matches_only_its_value(column in "[a-z_]{1,12}", value in 0i64..10_000, other in 0i64..10_000) {
        let filter = RowFilter::parse(&format!("{}=eq.{}", column, value)).unwrap();
        prop_assert_eq!(filter.op, FilterOp::Eq);
        prop_assert!(filter.matches(&row(&column, value)));
        prop_assert_eq!(filter.matches(&row(&column, other)), value == other);
    }

    #[test]
    fn test_in_filter_matches_members(values in prop::collection::vec(0i64..100, 1..8), candidate in 0i64..100) {
        let list = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        let filter = RowFilter::parse(&format!("content_id=in.({})", list)).unwrap();
        prop_assert_eq!(filter.matches(&json!({"content_id": candidate})), values.contains(&candidate));
    }

    #[test]
    fn test_parse_never_panics(input in ".{0,40}") {
        let _ = RowFilter::parse(&input);
    }

    #[test]
    fn test_missing_column_never_matches(value in 0i64..100) {
        let filter = RowFilter::parse(&format!("content_id=gte.{}", value)).unwrap();
        let row = json!({"other": value});
        prop_assert!(!filter.matches(&row));
    }
}
