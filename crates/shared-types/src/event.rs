//! # Event Record
//!
//! The canonical unit persisted by the event store. The event taxonomy is a
//! closed tagged variant; domain extensions (elicitation, coordination) use
//! the reserved `Custom` kind and carry their inner tag in the payload.

use crate::id::EventId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Standard event kinds for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Command events
    CommandReceived,
    CommandValidated,
    CommandExecuted,
    CommandFailed,

    // Agent events
    AgentRegistered,
    AgentDisconnected,
    AgentHeartbeat,

    // System events
    SystemStarted,
    SystemShutdown,
    DegradationTriggered,
    RecoveryCompleted,

    // Snapshot events
    SnapshotCreated,
    SnapshotRestored,

    /// Reserved extension kind. The inner tag (for example
    /// `elicitation_type`) travels in the event payload.
    Custom,
}

impl EventType {
    /// Stable string form used for indexing.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandReceived => "command_received",
            Self::CommandValidated => "command_validated",
            Self::CommandExecuted => "command_executed",
            Self::CommandFailed => "command_failed",
            Self::AgentRegistered => "agent_registered",
            Self::AgentDisconnected => "agent_disconnected",
            Self::AgentHeartbeat => "agent_heartbeat",
            Self::SystemStarted => "system_started",
            Self::SystemShutdown => "system_shutdown",
            Self::DegradationTriggered => "degradation_triggered",
            Self::RecoveryCompleted => "recovery_completed",
            Self::SnapshotCreated => "snapshot_created",
            Self::SnapshotRestored => "snapshot_restored",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core event record for all bridge events.
///
/// `event_id` and `sequence` are `None` until the event store assigns them
/// under its write lock; every persisted event carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic identifier, assigned by the event store at append time.
    pub event_id: Option<EventId>,
    /// Global 1-based append position, assigned by the event store.
    pub sequence: Option<u64>,

    /// Event kind.
    pub event_type: EventType,
    /// Entity this event belongs to.
    pub aggregate_id: String,
    /// Entity family.
    pub aggregate_type: String,

    /// Wall-clock creation time in milliseconds. Informational only;
    /// ordering relies on `sequence`.
    pub timestamp_ms: u64,

    /// Optional request linkage.
    pub correlation_id: Option<Uuid>,
    /// Event that caused this event.
    pub causation_id: Option<Uuid>,

    /// Structured payload.
    pub data: BTreeMap<String, Value>,
    /// Structured metadata.
    pub metadata: BTreeMap<String, Value>,

    /// Agent on whose behalf the event was written.
    pub source_agent: Option<String>,
    /// Component that produced the event.
    pub source_component: String,

    /// Payload schema version for evolution.
    pub schema_version: u32,
}

impl Event {
    /// Create a new unsequenced event.
    #[must_use]
    pub fn new(
        event_type: EventType,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
    ) -> Self {
        Self {
            event_id: None,
            sequence: None,
            event_type,
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            timestamp_ms: now_ms(),
            correlation_id: None,
            causation_id: None,
            data: BTreeMap::new(),
            metadata: BTreeMap::new(),
            source_agent: None,
            source_component: "unknown".to_string(),
            schema_version: 1,
        }
    }

    /// Attach the structured payload.
    #[must_use]
    pub fn with_data(mut self, data: BTreeMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the producing component.
    #[must_use]
    pub fn with_source_component(mut self, component: impl Into<String>) -> Self {
        self.source_component = component.into();
        self
    }

    /// Set the originating agent.
    #[must_use]
    pub fn with_source_agent(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = Some(agent.into());
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the causation ID.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Serialized payload size in bytes, as it would be written to disk.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(usize::MAX)
    }

    /// Serialize to the binary storage form.
    ///
    /// # Errors
    ///
    /// Returns the bincode error when the payload cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from the binary storage form.
    ///
    /// # Errors
    ///
    /// Returns the bincode error when the bytes are not a valid event.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let mut data = BTreeMap::new();
        data.insert("key".to_string(), Value::from("value"));

        let event = Event::new(EventType::Custom, "elicit_abc", "elicitation")
            .with_data(data)
            .with_source_component("elicitation_manager")
            .with_source_agent("agent_a");

        let bytes = event.to_bytes().unwrap();
        let restored = Event::from_bytes(&bytes).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::Custom.as_str(), "custom");
        assert_eq!(EventType::AgentRegistered.as_str(), "agent_registered");
        assert_eq!(EventType::SnapshotCreated.to_string(), "snapshot_created");
    }

    #[test]
    fn test_new_event_is_unsequenced() {
        let event = Event::new(EventType::SystemStarted, "system", "system");
        assert!(event.event_id.is_none());
        assert!(event.sequence.is_none());
        assert!(event.timestamp_ms > 0);
        assert_eq!(event.schema_version, 1);
    }

    #[test]
    fn test_size_accounts_for_payload() {
        let small = Event::new(EventType::Custom, "a", "t");
        let mut data = BTreeMap::new();
        data.insert("blob".to_string(), Value::Str("x".repeat(4096)));
        let large = Event::new(EventType::Custom, "a", "t").with_data(data);

        assert!(large.size_bytes() > small.size_bytes() + 4000);
    }
}
