//! Property-based tests

mod backoff_proptest;
mod filter_proptest;
mod merge_proptest;
