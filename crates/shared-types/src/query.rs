//! # Queries, Filters, and Batches
//!
//! Filter criteria and query specifications for retrieving events, plus the
//! atomic batch wrapper with its size limits.

use crate::event::{Event, EventType};
use crate::{MAX_BATCH_EVENTS, MAX_BATCH_SIZE_BYTES, MAX_QUERY_LIMIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Filter criteria for event queries.
///
/// Empty/`None` fields match everything. Sequence and timestamp bounds are
/// exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub aggregate_ids: Option<Vec<String>>,
    pub aggregate_types: Option<Vec<String>>,
    pub source_agents: Option<Vec<String>>,
    pub source_components: Option<Vec<String>>,

    pub after_timestamp_ms: Option<u64>,
    pub before_timestamp_ms: Option<u64>,
    pub after_sequence: Option<u64>,
    pub before_sequence: Option<u64>,

    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
}

impl EventFilter {
    /// Filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter for a single aggregate type.
    #[must_use]
    pub fn for_aggregate_type(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_types: Some(vec![aggregate_type.into()]),
            ..Self::default()
        }
    }

    /// Filter for a single aggregate.
    #[must_use]
    pub fn for_aggregate(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_ids: Some(vec![aggregate_id.into()]),
            ..Self::default()
        }
    }

    /// Filter for specific event types.
    #[must_use]
    pub fn for_event_types(event_types: Vec<EventType>) -> Self {
        Self {
            event_types: Some(event_types),
            ..Self::default()
        }
    }

    /// Check whether an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(ids) = &self.aggregate_ids {
            if !ids.iter().any(|id| id == &event.aggregate_id) {
                return false;
            }
        }
        if let Some(types) = &self.aggregate_types {
            if !types.iter().any(|t| t == &event.aggregate_type) {
                return false;
            }
        }
        if let Some(agents) = &self.source_agents {
            match &event.source_agent {
                Some(agent) if agents.iter().any(|a| a == agent) => {}
                _ => return false,
            }
        }
        if let Some(components) = &self.source_components {
            if !components.iter().any(|c| c == &event.source_component) {
                return false;
            }
        }

        if let Some(after) = self.after_timestamp_ms {
            if event.timestamp_ms <= after {
                return false;
            }
        }
        if let Some(before) = self.before_timestamp_ms {
            if event.timestamp_ms >= before {
                return false;
            }
        }
        if let Some(after) = self.after_sequence {
            match event.sequence {
                Some(seq) if seq > after => {}
                _ => return false,
            }
        }
        if let Some(before) = self.before_sequence {
            match event.sequence {
                Some(seq) if seq < before => {}
                _ => return false,
            }
        }

        if let Some(correlation_id) = self.correlation_id {
            if event.correlation_id != Some(correlation_id) {
                return false;
            }
        }
        if let Some(causation_id) = self.causation_id {
            if event.causation_id != Some(causation_id) {
                return false;
            }
        }

        true
    }
}

/// Result ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Sequence,
    Timestamp,
}

/// Query specification for retrieving events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub filter: EventFilter,
    pub offset: usize,
    pub limit: usize,
    pub order_by: OrderBy,
    pub ascending: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            filter: EventFilter::default(),
            offset: 0,
            limit: 1000,
            order_by: OrderBy::Sequence,
            ascending: true,
        }
    }
}

impl EventQuery {
    /// Query with the given filter and default pagination.
    #[must_use]
    pub fn with_filter(filter: EventFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Effective limit, clamped to the query maximum.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_QUERY_LIMIT)
    }
}

/// Result of an event query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Matched events, ordered per the query.
    pub events: Vec<Event>,
    /// Approximate total of matching events (scanned, not exact).
    pub total_count: usize,
    /// Whether more results exist past `offset + limit`.
    pub has_more: bool,
    /// Measured execution time in milliseconds.
    pub execution_time_ms: f64,
}

/// Errors from batch validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchValidationError {
    /// The batch contains no events.
    #[error("Batch cannot be empty")]
    Empty,

    /// Too many events in one batch.
    #[error("Batch of {count} events exceeds limit of {limit}")]
    TooManyEvents { count: usize, limit: usize },

    /// The serialized batch is too large.
    #[error("Batch size {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Batch of events for atomic append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<Event>,
    pub batch_id: Uuid,
    pub correlation_id: Option<Uuid>,
}

impl EventBatch {
    /// Create a batch from events.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            batch_id: Uuid::new_v4(),
            correlation_id: None,
        }
    }

    /// Total serialized size of all events in the batch.
    #[must_use]
    pub fn total_size_bytes(&self) -> usize {
        self.events.iter().map(Event::size_bytes).sum()
    }

    /// Validate batch count and size limits.
    ///
    /// # Errors
    ///
    /// Returns a `BatchValidationError` when the batch is empty, has more
    /// than 1000 events, or serializes past 10 MiB.
    pub fn validate(&self) -> Result<(), BatchValidationError> {
        if self.events.is_empty() {
            return Err(BatchValidationError::Empty);
        }
        if self.events.len() > MAX_BATCH_EVENTS {
            return Err(BatchValidationError::TooManyEvents {
                count: self.events.len(),
                limit: MAX_BATCH_EVENTS,
            });
        }

        let size = self.total_size_bytes();
        if size > MAX_BATCH_SIZE_BYTES {
            return Err(BatchValidationError::TooLarge {
                size,
                limit: MAX_BATCH_SIZE_BYTES,
            });
        }

        Ok(())
    }
}
