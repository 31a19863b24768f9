//! # Elicitation Projection
//!
//! In-memory materialized view of current elicitation state, computed as a
//! pure fold over the event log. Every container is deterministic
//! (`BTreeMap`/`BTreeSet`), so serializing a live projection and one
//! rebuilt from the log yields identical bytes.

use crate::events::{parse_event, ParsedElicitationEvent};
use crate::models::{ElicitationRequest, ElicitationStatus};
use serde::{Deserialize, Serialize};
use shared_types::Event;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Response-key entry retained while a request is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseKeyEntry {
    pub key: String,
    pub to_agent: String,
    pub nonce: String,
}

/// Current-state projection over elicitation events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElicitationProjection {
    /// Pending requests by ID.
    pub active_elicitations: BTreeMap<String, ElicitationRequest>,
    /// Terminal requests by ID.
    pub completed_elicitations: BTreeMap<String, ElicitationRequest>,

    /// Pending request IDs by addressed responder.
    pub by_target_agent: BTreeMap<String, BTreeSet<String>>,
    /// Pending request IDs by requester.
    pub by_source_agent: BTreeMap<String, BTreeSet<String>>,

    /// Every nonce observed in request events (replay guard).
    pub nonces_used: BTreeSet<String>,
    /// Response keys of active requests.
    pub response_keys: BTreeMap<String, ResponseKeyEntry>,

    // Counters.
    pub total_requests: u64,
    pub total_responses: u64,
    pub total_timeouts: u64,
    pub total_violations: u64,

    // Sequence tracking.
    pub last_sequence: u64,
    pub snapshot_sequence: u64,
    pub events_since_snapshot: u64,
}

impl ElicitationProjection {
    /// Apply one event from the log.
    ///
    /// Safe to call twice for the same logical event when the first call
    /// was optimistic (sequence not yet assigned): the second, sequenced
    /// application only advances the sequence bookkeeping.
    pub fn apply(&mut self, event: &Event) {
        let Some(parsed) = parse_event(event) else {
            return;
        };

        match parsed {
            ParsedElicitationEvent::Requested { request } => {
                if let Some(existing) = self.active_elicitations.get_mut(&request.id) {
                    // Sequenced re-application after an optimistic apply.
                    if existing.sequence.is_none() {
                        existing.sequence = request.sequence;
                    }
                } else if !self.completed_elicitations.contains_key(&request.id) {
                    self.add_active(request);
                } else {
                    debug!(elicitation_id = %request.id, "Request event for terminal elicitation ignored");
                }
            }
            ParsedElicitationEvent::Terminal {
                elicitation_id,
                status,
                response_type,
                responded_at_ms,
            } => {
                self.complete(&elicitation_id, status, response_type, responded_at_ms);
            }
            ParsedElicitationEvent::Violation => {
                self.total_violations += 1;
            }
        }

        if let Some(sequence) = event.sequence {
            self.last_sequence = self.last_sequence.max(sequence);
            self.events_since_snapshot += 1;
        }
    }

    /// Register a new active request and its indices.
    pub fn add_active(&mut self, request: ElicitationRequest) {
        self.by_target_agent
            .entry(request.to_agent.clone())
            .or_default()
            .insert(request.id.clone());
        self.by_source_agent
            .entry(request.from_agent.clone())
            .or_default()
            .insert(request.id.clone());

        self.nonces_used.insert(request.nonce.clone());
        self.response_keys.insert(
            request.id.clone(),
            ResponseKeyEntry {
                key: request.expected_response_key.clone(),
                to_agent: request.to_agent.clone(),
                nonce: request.nonce.clone(),
            },
        );

        self.total_requests += 1;
        self.active_elicitations.insert(request.id.clone(), request);
    }

    /// Move a request to its terminal state, releasing active indices.
    /// The nonce stays in `nonces_used` as the replay guard.
    pub fn complete(
        &mut self,
        elicitation_id: &str,
        status: ElicitationStatus,
        response_type: Option<String>,
        responded_at_ms: u64,
    ) {
        let Some(mut request) = self.active_elicitations.remove(elicitation_id) else {
            return;
        };

        request.status = status;
        request.response_type = response_type;
        request.responded_at_ms = Some(responded_at_ms);

        Self::remove_index(&mut self.by_target_agent, &request.to_agent, elicitation_id);
        Self::remove_index(&mut self.by_source_agent, &request.from_agent, elicitation_id);
        self.response_keys.remove(elicitation_id);

        match status {
            ElicitationStatus::Accepted | ElicitationStatus::Declined => {
                self.total_responses += 1;
            }
            ElicitationStatus::Expired => self.total_timeouts += 1,
            _ => {}
        }

        self.completed_elicitations
            .insert(elicitation_id.to_string(), request);
    }

    /// Pending request IDs addressed to an agent.
    #[must_use]
    pub fn pending_for(&self, agent_id: &str) -> Vec<&ElicitationRequest> {
        self.by_target_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.active_elicitations.get(id))
                    .filter(|request| request.status == ElicitationStatus::Pending)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Canonical bytes of the projection, for purity checks and
    /// snapshots.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Mark a snapshot taken at the current sequence.
    pub fn mark_snapshot(&mut self) {
        self.snapshot_sequence = self.last_sequence;
        self.events_since_snapshot = 0;
    }

    fn remove_index(
        index: &mut BTreeMap<String, BTreeSet<String>>,
        agent: &str,
        elicitation_id: &str,
    ) {
        if let Some(ids) = index.get_mut(agent) {
            ids.remove(elicitation_id);
            if ids.is_empty() {
                index.remove(agent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{created_event, responded_event, ElicitationEventKind};
    use shared_types::Value;

    fn request(id: &str, from: &str, to: &str, nonce: &str) -> ElicitationRequest {
        ElicitationRequest {
            id: id.to_string(),
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            message: "ping".to_string(),
            schema: Value::Map(Default::default()),
            nonce: nonce.to_string(),
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

    fn sequenced(mut event: Event, sequence: u64) -> Event {
        event.sequence = Some(sequence);
        event
    }

    #[test]
    fn test_request_then_accept() {
        let mut projection = ElicitationProjection::default();

        let req = request("elicit_1", "agent_a", "agent_b", "n1");
        projection.apply(&sequenced(created_event(&req), 1));

        assert_eq!(projection.active_elicitations.len(), 1);
        assert_eq!(projection.total_requests, 1);
        assert!(projection.nonces_used.contains("n1"));
        assert!(projection.response_keys.contains_key("elicit_1"));
        assert_eq!(projection.pending_for("agent_b").len(), 1);

        let response = responded_event(
            "elicit_1",
            ElicitationEventKind::Accepted,
            "agent_b",
            None,
            "rsig",
            2_000,
            Some(1),
        );
        projection.apply(&sequenced(response, 2));

        assert!(projection.active_elicitations.is_empty());
        assert_eq!(projection.completed_elicitations.len(), 1);
        assert_eq!(projection.total_responses, 1);
        assert!(projection.pending_for("agent_b").is_empty());
        // Nonce stays for replay protection; the response key is gone.
        assert!(projection.nonces_used.contains("n1"));
        assert!(!projection.response_keys.contains_key("elicit_1"));
        assert_eq!(projection.last_sequence, 2);

        let completed = &projection.completed_elicitations["elicit_1"];
        assert_eq!(completed.status, ElicitationStatus::Accepted);
        assert_eq!(completed.responded_at_ms, Some(2_000));
    }

    #[test]
    fn test_terminal_event_without_request_ignored() {
        let mut projection = ElicitationProjection::default();
        let response = responded_event(
            "elicit_ghost",
            ElicitationEventKind::Declined,
            "agent_b",
            None,
            "rsig",
            2_000,
            None,
        );
        projection.apply(&sequenced(response, 1));

        assert!(projection.completed_elicitations.is_empty());
        assert_eq!(projection.total_responses, 0);
        // Sequence bookkeeping still advances.
        assert_eq!(projection.last_sequence, 1);
    }

    #[test]
    fn test_second_terminal_is_absorbed() {
        let mut projection = ElicitationProjection::default();
        projection.apply(&sequenced(
            created_event(&request("elicit_1", "a", "b", "n1")),
            1,
        ));
        projection.apply(&sequenced(
            responded_event(
                "elicit_1",
                ElicitationEventKind::Declined,
                "b",
                None,
                "s",
                2_000,
                Some(1),
            ),
            2,
        ));
        projection.apply(&sequenced(
            responded_event(
                "elicit_1",
                ElicitationEventKind::Cancelled,
                "a",
                None,
                "s",
                3_000,
                Some(1),
            ),
            3,
        ));

        let completed = &projection.completed_elicitations["elicit_1"];
        assert_eq!(completed.status, ElicitationStatus::Declined);
        assert_eq!(projection.total_responses, 1);
    }

    #[test]
    fn test_optimistic_then_sequenced_apply() {
        let mut projection = ElicitationProjection::default();
        let req = request("elicit_1", "a", "b", "n1");

        // Optimistic application before the store assigned a sequence.
        projection.apply(&created_event(&req));
        assert_eq!(projection.total_requests, 1);
        assert_eq!(projection.last_sequence, 0);
        assert_eq!(projection.events_since_snapshot, 0);

        // Sequenced re-application from the flushed batch.
        projection.apply(&sequenced(created_event(&req), 5));
        assert_eq!(projection.total_requests, 1, "no double count");
        assert_eq!(projection.last_sequence, 5);
        assert_eq!(projection.events_since_snapshot, 1);
        assert_eq!(
            projection.active_elicitations["elicit_1"].sequence,
            Some(5)
        );
    }

    #[test]
    fn test_live_equals_rebuild() {
        let events = [
            sequenced(created_event(&request("elicit_1", "a", "b", "n1")), 1),
            sequenced(created_event(&request("elicit_2", "a", "c", "n2")), 2),
            sequenced(
                responded_event(
                    "elicit_1",
                    ElicitationEventKind::Accepted,
                    "b",
                    None,
                    "s",
                    5_000,
                    Some(1),
                ),
                3,
            ),
        ];

        let mut live = ElicitationProjection::default();
        for event in &events {
            live.apply(event);
        }

        let mut rebuilt = ElicitationProjection::default();
        for event in &events {
            rebuilt.apply(event);
        }

        assert_eq!(live.canonical_bytes(), rebuilt.canonical_bytes());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut projection = ElicitationProjection::default();
        projection.apply(&sequenced(
            created_event(&request("elicit_1", "a", "b", "n1")),
            1,
        ));
        projection.mark_snapshot();

        let bytes = projection.canonical_bytes();
        let restored: ElicitationProjection = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, projection);
        assert_eq!(restored.snapshot_sequence, 1);
        assert_eq!(restored.events_since_snapshot, 0);
    }
}
