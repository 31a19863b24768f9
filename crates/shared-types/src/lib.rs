//! # Shared Types - Canonical Event Model
//!
//! Defines the event model shared by every subsystem of the bridge: the
//! `Event` record, monotonic event identifiers, the self-describing payload
//! `Value` tree, and the query/filter/batch types consumed by the event
//! store.
//!
//! ## Design Rules
//!
//! - The event taxonomy is a closed tagged variant (`EventType` plus a
//!   reserved `Custom` kind whose inner tag travels in the payload).
//! - Payloads are `Value` trees with `BTreeMap` maps so that binary and
//!   canonical JSON serialization are deterministic.
//! - `sequence` and `event_id` are assigned by the event store at append
//!   time; no component generates them implicitly.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod event;
pub mod id;
pub mod query;
pub mod value;

// Re-export main types
pub use event::{Event, EventType};
pub use id::{EventId, EventIdParseError, MonotonicEventIdGenerator};
pub use query::{EventBatch, EventFilter, EventQuery, OrderBy, QueryResult};
pub use value::Value;

/// Maximum size of a single serialized event payload.
pub const MAX_EVENT_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum number of events in a batch.
pub const MAX_BATCH_EVENTS: usize = 1000;

/// Maximum total serialized size of a batch.
pub const MAX_BATCH_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum number of events a single query may return.
pub const MAX_QUERY_LIMIT: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limits() {
        assert_eq!(MAX_EVENT_SIZE_BYTES, 1_048_576);
        assert_eq!(MAX_BATCH_SIZE_BYTES, 10 * MAX_EVENT_SIZE_BYTES);
        assert_eq!(MAX_BATCH_EVENTS, 1000);
    }
}
