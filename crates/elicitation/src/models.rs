//! Elicitation data models: request, status, safe views, and metrics.

use serde::{Deserialize, Serialize};
use shared_types::Value;
use std::fmt;

/// Elicitation request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElicitationStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
    Expired,
}

impl ElicitationStatus {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Whether the status absorbs further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ElicitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response kinds a caller may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// The addressed responder accepts with data.
    Accept,
    /// The addressed responder declines.
    Decline,
    /// The requester cancels its own request.
    Cancel,
}

impl ResponseType {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
        }
    }

    /// Terminal status this response leads to.
    #[must_use]
    pub fn terminal_status(&self) -> ElicitationStatus {
        match self {
            Self::Accept => ElicitationStatus::Accepted,
            Self::Decline => ElicitationStatus::Declined,
            Self::Cancel => ElicitationStatus::Cancelled,
        }
    }
}

/// Cryptographically signed elicitation request, as held in the
/// projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationRequest {
    /// `elicit_` plus 16 hex characters.
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message: String,
    /// JSON schema the accept data must satisfy.
    pub schema: Value,
    /// Single-use random nonce, minimum 128 bits.
    pub nonce: String,
    /// HMAC over the canonical request fields.
    pub request_signature: String,
    /// One-way key only the addressed responder's path can derive.
    pub expected_response_key: String,
    pub timeout_seconds: u64,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub status: ElicitationStatus,

    /// Sequence of the request event, once durably appended.
    pub sequence: Option<u64>,

    /// Populated when a terminal response arrives.
    pub response_type: Option<String>,
    pub responded_at_ms: Option<u64>,
}

impl ElicitationRequest {
    /// Whether the request deadline has passed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Safe view of a pending request: excludes signatures, nonce, and the
/// response key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingElicitation {
    pub id: String,
    pub from_agent: String,
    pub message: String,
    pub schema: serde_json::Value,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl From<&ElicitationRequest> for PendingElicitation {
    fn from(request: &ElicitationRequest) -> Self {
        Self {
            id: request.id.clone(),
            from_agent: request.from_agent.clone(),
            message: request.message.clone(),
            schema: request.schema.to_json(),
            created_at_ms: request.created_at_ms,
            expires_at_ms: request.expires_at_ms,
        }
    }
}

/// Status view for a single elicitation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElicitationStatusView {
    pub status: ElicitationStatus,
    pub created_at_ms: u64,
    /// Present while the request is active.
    pub expires_at_ms: Option<u64>,
    /// Present once a terminal response arrived.
    pub responded_at_ms: Option<u64>,
}

/// Performance and security metrics for the manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElicitationMetrics {
    // Latency percentiles over the trailing window, in milliseconds.
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,

    // Current state counts.
    pub active_elicitations: usize,
    pub pending_elicitations: usize,

    // Reliability.
    pub delivery_rate: f64,
    pub timeout_rate: f64,

    // Totals from the projection.
    pub total_requests: u64,
    pub total_responses: u64,
    pub total_timeouts: u64,

    // Security counters.
    pub rate_limit_violations: u64,
    pub impersonation_attempts: u64,
    pub replay_attempts: u64,
    pub notification_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!ElicitationStatus::Pending.is_terminal());
        assert!(ElicitationStatus::Accepted.is_terminal());
        assert!(ElicitationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_response_type_mapping() {
        assert_eq!(
            ResponseType::Accept.terminal_status(),
            ElicitationStatus::Accepted
        );
        assert_eq!(
            ResponseType::Decline.terminal_status(),
            ElicitationStatus::Declined
        );
        assert_eq!(
            ResponseType::Cancel.terminal_status(),
            ElicitationStatus::Cancelled
        );
    }

    #[test]
    fn test_safe_view_excludes_secrets() {
        let request = ElicitationRequest {
            id: "elicit_0011223344556677".to_string(),
            from_agent: "agent_a".to_string(),
            to_agent: "agent_b".to_string(),
            message: "ping".to_string(),
            schema: Value::Map(Default::default()),
            nonce: "secret-nonce".to_string(),
            request_signature: "sig".to_string(),
            expected_response_key: "key".to_string(),
            timeout_seconds: 30,
            created_at_ms: 1000,
            expires_at_ms: 31_000,
            status: ElicitationStatus::Pending,
            sequence: Some(1),
            response_type: None,
            responded_at_ms: None,
        };

        let view = PendingElicitation::from(&request);
        let serialized = serde_json::to_string(&view).unwrap();
        assert!(!serialized.contains("secret-nonce"));
        assert!(!serialized.contains("sig"));
        assert!(!serialized.contains("\"key\""));
        assert!(serialized.contains("ping"));
    }
}
