//! # Elicitation Events
//!
//! Elicitation events ride the store's reserved `Custom` kind with their
//! inner tag in `data["elicitation_type"]`. Builders here produce the
//! canonical payloads; `ParsedElicitationEvent` is the read side used by
//! the projection.

use crate::audit::Severity;
use crate::models::{ElicitationRequest, ElicitationStatus};
use shared_types::{Event, EventType, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregate family for lifecycle events.
pub const AGGREGATE_ELICITATION: &str = "elicitation";
/// Aggregate family for persisted security violations.
pub const AGGREGATE_ELICITATION_SECURITY: &str = "elicitation_security";
/// Component stamped into emitted events.
pub const SOURCE_COMPONENT: &str = "elicitation_manager";

/// Inner tag carried in `data["elicitation_type"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitationEventKind {
    Requested,
    Accepted,
    Declined,
    Cancelled,
    Expired,
    SecurityViolation,
}

impl ElicitationEventKind {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "elicitation_requested",
            Self::Accepted => "elicitation_accepted",
            Self::Declined => "elicitation_declined",
            Self::Cancelled => "elicitation_cancelled",
            Self::Expired => "elicitation_expired",
            Self::SecurityViolation => "elicitation_security_violation",
        }
    }

    /// Parse from the stable string form.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "elicitation_requested" => Some(Self::Requested),
            "elicitation_accepted" => Some(Self::Accepted),
            "elicitation_declined" => Some(Self::Declined),
            "elicitation_cancelled" => Some(Self::Cancelled),
            "elicitation_expired" => Some(Self::Expired),
            "elicitation_security_violation" => Some(Self::SecurityViolation),
            _ => None,
        }
    }

    /// Terminal status for lifecycle kinds.
    #[must_use]
    pub fn terminal_status(&self) -> Option<ElicitationStatus> {
        match self {
            Self::Accepted => Some(ElicitationStatus::Accepted),
            Self::Declined => Some(ElicitationStatus::Declined),
            Self::Cancelled => Some(ElicitationStatus::Cancelled),
            Self::Expired => Some(ElicitationStatus::Expired),
            Self::Requested | Self::SecurityViolation => None,
        }
    }
}

impl fmt::Display for ElicitationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event for a newly created request.
#[must_use]
pub fn created_event(request: &ElicitationRequest) -> Event {
    let mut data = BTreeMap::new();
    data.insert(
        "elicitation_type".to_string(),
        Value::from(ElicitationEventKind::Requested.as_str()),
    );
    data.insert("from_agent".to_string(), Value::from(request.from_agent.as_str()));
    data.insert("to_agent".to_string(), Value::from(request.to_agent.as_str()));
    data.insert("message".to_string(), Value::from(request.message.as_str()));
    data.insert("schema".to_string(), request.schema.clone());
    data.insert("nonce".to_string(), Value::from(request.nonce.as_str()));
    data.insert(
        "request_signature".to_string(),
        Value::from(request.request_signature.as_str()),
    );
    data.insert(
        "expected_response_key".to_string(),
        Value::from(request.expected_response_key.as_str()),
    );
    data.insert(
        "timeout_seconds".to_string(),
        Value::from(request.timeout_seconds),
    );
    data.insert("created_at".to_string(), Value::from(request.created_at_ms));
    data.insert("expires_at".to_string(), Value::from(request.expires_at_ms));

    Event::new(EventType::Custom, request.id.clone(), AGGREGATE_ELICITATION)
        .with_data(data)
        .with_metadata(standard_metadata())
        .with_source_component(SOURCE_COMPONENT)
        .with_source_agent(request.from_agent.clone())
}

/// Event for a terminal response (accept / decline / cancel).
#[must_use]
pub fn responded_event(
    elicitation_id: &str,
    kind: ElicitationEventKind,
    responding_agent: &str,
    response_data: Option<&Value>,
    response_signature: &str,
    responded_at_ms: u64,
    request_sequence: Option<u64>,
) -> Event {
    let mut data = BTreeMap::new();
    data.insert("elicitation_type".to_string(), Value::from(kind.as_str()));
    data.insert(
        "responding_agent".to_string(),
        Value::from(responding_agent),
    );
    if let Some(response_data) = response_data {
        data.insert("response_data".to_string(), response_data.clone());
    }
    data.insert(
        "response_signature".to_string(),
        Value::from(response_signature),
    );
    data.insert("responded_at".to_string(), Value::from(responded_at_ms));
    if let Some(sequence) = request_sequence {
        data.insert("request_sequence".to_string(), Value::from(sequence));
    }

    Event::new(EventType::Custom, elicitation_id, AGGREGATE_ELICITATION)
        .with_data(data)
        .with_metadata(standard_metadata())
        .with_source_component(SOURCE_COMPONENT)
        .with_source_agent(responding_agent)
}

/// Event for an expiry-sweep transition.
#[must_use]
pub fn expired_event(elicitation_id: &str, expired_at_ms: u64) -> Event {
    let mut data = BTreeMap::new();
    data.insert(
        "elicitation_type".to_string(),
        Value::from(ElicitationEventKind::Expired.as_str()),
    );
    data.insert("expired_at".to_string(), Value::from(expired_at_ms));

    Event::new(EventType::Custom, elicitation_id, AGGREGATE_ELICITATION)
        .with_data(data)
        .with_metadata(standard_metadata())
        .with_source_component(SOURCE_COMPONENT)
        .with_source_agent("system")
}

/// Event for a persisted security violation.
#[must_use]
pub fn security_event(
    violation_type: &str,
    agent: &str,
    severity: Severity,
    elicitation_id: Option<&str>,
    details: BTreeMap<String, Value>,
) -> Event {
    let mut data = BTreeMap::new();
    data.insert(
        "elicitation_type".to_string(),
        Value::from(ElicitationEventKind::SecurityViolation.as_str()),
    );
    data.insert("violation_type".to_string(), Value::from(violation_type));
    data.insert("agent".to_string(), Value::from(agent));
    data.insert("severity".to_string(), Value::from(severity.as_str()));
    data.insert("details".to_string(), Value::Map(details));

    let aggregate_id = elicitation_id.unwrap_or("security");
    Event::new(
        EventType::Custom,
        aggregate_id,
        AGGREGATE_ELICITATION_SECURITY,
    )
    .with_data(data)
    .with_metadata(standard_metadata())
    .with_source_component(SOURCE_COMPONENT)
    .with_source_agent(agent)
}

fn standard_metadata() -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("schema_version".to_string(), Value::from("1.0"));
    metadata
}

/// Parsed view of an elicitation event, as consumed by the projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedElicitationEvent {
    /// A new request entered the log.
    Requested { request: ElicitationRequest },
    /// A terminal transition for an existing request.
    Terminal {
        elicitation_id: String,
        status: ElicitationStatus,
        response_type: Option<String>,
        responded_at_ms: u64,
    },
    /// A persisted security violation.
    Violation,
}

/// Parse an event from the log into its elicitation meaning.
///
/// Returns `None` for events outside the elicitation domain or with
/// malformed payloads; such events are skipped by the projection.
#[must_use]
pub fn parse_event(event: &Event) -> Option<ParsedElicitationEvent> {
    if event.event_type != EventType::Custom {
        return None;
    }
    if event.aggregate_type != AGGREGATE_ELICITATION
        && event.aggregate_type != AGGREGATE_ELICITATION_SECURITY
    {
        return None;
    }

    let tag = event.data.get("elicitation_type")?.as_str()?;
    let kind = ElicitationEventKind::parse(tag)?;

    match kind {
        ElicitationEventKind::Requested => {
            let request = ElicitationRequest {
                id: event.aggregate_id.clone(),
                from_agent: event.data.get("from_agent")?.as_str()?.to_string(),
                to_agent: event.data.get("to_agent")?.as_str()?.to_string(),
                message: event.data.get("message")?.as_str()?.to_string(),
                schema: event.data.get("schema")?.clone(),
                nonce: event.data.get("nonce")?.as_str()?.to_string(),
                request_signature: event
                    .data
                    .get("request_signature")?
                    .as_str()?
                    .to_string(),
                expected_response_key: event
                    .data
                    .get("expected_response_key")?
                    .as_str()?
                    .to_string(),
                timeout_seconds: event.data.get("timeout_seconds")?.as_u64()?,
                created_at_ms: event.data.get("created_at")?.as_u64()?,
                expires_at_ms: event.data.get("expires_at")?.as_u64()?,
                status: ElicitationStatus::Pending,
                sequence: event.sequence,
                response_type: None,
                responded_at_ms: None,
            };
            Some(ParsedElicitationEvent::Requested { request })
        }
        ElicitationEventKind::Accepted
        | ElicitationEventKind::Declined
        | ElicitationEventKind::Cancelled => Some(ParsedElicitationEvent::Terminal {
            elicitation_id: event.aggregate_id.clone(),
            status: kind.terminal_status()?,
            response_type: event
                .data
                .get("responding_agent")
                .and_then(Value::as_str)
                .map(|_| terminal_response_type(kind)),
            responded_at_ms: event.data.get("responded_at")?.as_u64()?,
        }),
        ElicitationEventKind::Expired => Some(ParsedElicitationEvent::Terminal {
            elicitation_id: event.aggregate_id.clone(),
            status: ElicitationStatus::Expired,
            response_type: None,
            responded_at_ms: event.data.get("expired_at")?.as_u64()?,
        }),
        ElicitationEventKind::SecurityViolation => Some(ParsedElicitationEvent::Violation),
    }
}

fn terminal_response_type(kind: ElicitationEventKind) -> String {
    match kind {
        ElicitationEventKind::Accepted => "accept",
        ElicitationEventKind::Declined => "decline",
        ElicitationEventKind::Cancelled => "cancel",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ElicitationRequest {
        ElicitationRequest {
            id: "elicit_aaaaaaaaaaaaaaaa".to_string(),
            from_agent: "agent_a".to_string(),
            to_agent: "agent_b".to_string(),
            message: "ping".to_string(),
            schema: Value::Map(Default::default()),
            nonce: "feedface".to_string(),
            request_signature: "sig".to_string(),
            expected_response_key: "key".to_string(),
            timeout_seconds: 30,
            created_at_ms: 1_000,
            expires_at_ms: 31_000,
            status: ElicitationStatus::Pending,
            sequence: None,
            response_type: None,
            responded_at_ms: None,
        }
    }

    #[test]
    fn test_created_event_round_trip() {
        let request = sample_request();
        let mut event = created_event(&request);
        event.sequence = Some(7);

        match parse_event(&event) {
            Some(ParsedElicitationEvent::Requested { request: parsed }) => {
                assert_eq!(parsed.id, request.id);
                assert_eq!(parsed.from_agent, "agent_a");
                assert_eq!(parsed.to_agent, "agent_b");
                assert_eq!(parsed.nonce, "feedface");
                assert_eq!(parsed.sequence, Some(7));
                assert_eq!(parsed.status, ElicitationStatus::Pending);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_responded_event_round_trip() {
        let event = responded_event(
            "elicit_aaaaaaaaaaaaaaaa",
            ElicitationEventKind::Accepted,
            "agent_b",
            None,
            "rsig",
            42_000,
            Some(7),
        );

        match parse_event(&event) {
            Some(ParsedElicitationEvent::Terminal {
                elicitation_id,
                status,
                responded_at_ms,
                ..
            }) => {
                assert_eq!(elicitation_id, "elicit_aaaaaaaaaaaaaaaa");
                assert_eq!(status, ElicitationStatus::Accepted);
                assert_eq!(responded_at_ms, 42_000);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_expired_event_round_trip() {
        let event = expired_event("elicit_aaaaaaaaaaaaaaaa", 99_000);
        match parse_event(&event) {
            Some(ParsedElicitationEvent::Terminal { status, .. }) => {
                assert_eq!(status, ElicitationStatus::Expired);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_security_event_parses_as_violation() {
        let event = security_event(
            "UNAUTHORIZED_ELICITATION_RESPONSE",
            "agent_c",
            Severity::Critical,
            Some("elicit_aaaaaaaaaaaaaaaa"),
            BTreeMap::new(),
        );
        assert_eq!(parse_event(&event), Some(ParsedElicitationEvent::Violation));
    }

    #[test]
    fn test_foreign_events_ignored() {
        let event = Event::new(EventType::AgentRegistered, "agent_a", "agent");
        assert!(parse_event(&event).is_none());

        let unrelated = Event::new(EventType::Custom, "x", "session");
        assert!(parse_event(&unrelated).is_none());
    }
}
