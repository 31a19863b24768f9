//! # Monotonic Event Identifiers
//!
//! Event IDs are `(timestamp_ns, sequence, node_id)` triples with a total
//! order. Timestamps come from a monotonic clock so that system clock
//! adjustments can never reorder IDs; the generator bumps by one nanosecond
//! when the clock stalls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Structured event identifier with monotonic timestamp, per-timestamp
/// sequence, and node components.
///
/// Ordering is lexicographic over `(timestamp_ns, sequence, node_id)`; the
/// derive relies on field declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// Monotonic-clock nanoseconds.
    pub timestamp_ns: u64,
    /// Per-timestamp sequence counter.
    pub sequence: u64,
    /// Originating node identifier.
    pub node_id: String,
}

/// Errors from parsing an event ID string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventIdParseError {
    /// The string does not have the `{timestamp}_{sequence}_{node}` shape.
    #[error("Invalid event ID format: {input}")]
    InvalidFormat { input: String },
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.timestamp_ns, self.sequence, self.node_id)
    }
}

impl FromStr for EventId {
    type Err = EventIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EventIdParseError::InvalidFormat {
            input: s.to_string(),
        };

        let mut parts = s.splitn(3, '_');
        let timestamp_ns = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let sequence = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let node_id = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            timestamp_ns,
            sequence,
            node_id: node_id.to_string(),
        })
    }
}

/// Number of recent timestamps whose sequence counters are retained.
const COUNTER_RETENTION: usize = 1000;

struct GeneratorState {
    /// Monotonic anchor captured at construction.
    anchor: Instant,
    /// Wall-clock nanoseconds at the anchor, used only to give timestamps a
    /// recognizable magnitude. All progress after that is monotonic.
    base_ns: u64,
    last_timestamp_ns: u64,
    sequence_counters: BTreeMap<u64, u64>,
}

/// Thread-safe monotonic event ID generator.
///
/// Guarantees that for two IDs X generated before Y,
/// `(X.timestamp_ns, X.sequence, X.node_id) < (Y.timestamp_ns, Y.sequence,
/// Y.node_id)`. Counters older than the most recent 1000 timestamps are
/// reaped to bound memory.
pub struct MonotonicEventIdGenerator {
    node_id: String,
    state: Mutex<GeneratorState>,
}

impl MonotonicEventIdGenerator {
    /// Create a generator for the given node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        let base_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Self {
            node_id: node_id.into(),
            state: Mutex::new(GeneratorState {
                anchor: Instant::now(),
                base_ns,
                last_timestamp_ns: 0,
                sequence_counters: BTreeMap::new(),
            }),
        }
    }

    /// Generate the next event ID.
    pub fn generate(&self) -> EventId {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let elapsed_ns = state.anchor.elapsed().as_nanos() as u64;
        let mut timestamp_ns = state.base_ns.saturating_add(elapsed_ns);

        // Never go backwards, even if the clock resolution stalls.
        if timestamp_ns <= state.last_timestamp_ns {
            timestamp_ns = state.last_timestamp_ns + 1;
        }

        let sequence = {
            let counter = state.sequence_counters.entry(timestamp_ns).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };

        // Reap counters older than the retention window.
        while state.sequence_counters.len() > COUNTER_RETENTION {
            state.sequence_counters.pop_first();
        }

        state.last_timestamp_ns = timestamp_ns;

        EventId {
            timestamp_ns,
            sequence,
            node_id: self.node_id.clone(),
        }
    }

    /// Node identifier this generator stamps into IDs.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}
