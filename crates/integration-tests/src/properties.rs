//! Quantified invariants and boundary behaviors.

use crate::harness::{object_schema, open_manager, open_store, pong_payload, SECRET};
use elicitation::{ElicitationConfig, ElicitationError, ResponseType, TokenBucket};
use event_store::segment::{list_segments, read_segment, RecordIter};
use event_store::EventStoreError;
use shared_types::{
    Event, EventBatch, EventType, MonotonicEventIdGenerator, Value, MAX_BATCH_EVENTS,
    MAX_EVENT_SIZE_BYTES,
};
use std::collections::BTreeMap;

fn simple_event(aggregate_id: &str) -> Event {
    Event::new(EventType::Custom, aggregate_id, "test").with_source_component("properties")
}

/// Property 1 - Monotone dense sequence starting at 1.
#[tokio::test]
async fn property_monotone_dense_sequence() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());

    let mut sequences = Vec::new();
    for i in 0..50 {
        let event = store
            .append(simple_event(&format!("agg_{i}")), None)
            .await
            .unwrap();
        sequences.push(event.sequence.unwrap());
    }

    let expected: Vec<u64> = (1..=50).collect();
    assert_eq!(sequences, expected);
}

/// Property 2 - Event IDs are totally ordered by generation order.
#[test]
fn property_event_id_total_order() {
    let generator = MonotonicEventIdGenerator::new("node-a");
    let ids: Vec<_> = (0..5000).map(|_| generator.generate()).collect();

    for pair in ids.windows(2) {
        assert!(
            (pair[0].timestamp_ns, pair[0].sequence, &pair[0].node_id)
                < (pair[1].timestamp_ns, pair[1].sequence, &pair[1].node_id)
        );
    }
}

/// Property 4 - Exactly one terminal event per elicitation; a second
/// terminal attempt fails with `not_found`.
#[tokio::test]
async fn property_single_terminal_event() {
    let temp = tempfile::tempdir().unwrap();
    let manager = open_manager(temp.path(), ElicitationConfig::durable()).await;

    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(30), None)
        .await
        .unwrap();
    manager
        .respond_to_elicitation(&id, "agent_b", ResponseType::Decline, None, None)
        .await
        .unwrap();

    for _ in 0..3 {
        let retry = manager
            .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
            .await;
        assert!(matches!(retry, Err(ElicitationError::NotFound { .. })));
        let cancel = manager
            .respond_to_elicitation(&id, "agent_a", ResponseType::Cancel, None, None)
            .await;
        assert!(matches!(cancel, Err(ElicitationError::NotFound { .. })));
    }

    // The log carries exactly one terminal event for the id.
    let terminal_count = manager
        .store()
        .stream(shared_types::EventFilter::for_aggregate(&id), 1)
        .unwrap()
        .filter(|event| {
            event
                .data
                .get("elicitation_type")
                .and_then(Value::as_str)
                .is_some_and(|tag| tag != "elicitation_requested")
        })
        .count();
    assert_eq!(terminal_count, 1);

    manager.shutdown().await;
}

/// Property 5 - Every terminal response in the log names the addressed
/// agent (accept/decline) or the requester (cancel).
#[tokio::test]
async fn property_addressed_responder() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = ElicitationConfig::durable();
    config.rate_limits.max_requests_per_minute = 1000;
    config.rate_limits.max_responses_per_minute = 1000;
    let manager = open_manager(temp.path(), config).await;

    let mut requests = Vec::new();
    for i in 0..20 {
        let from = format!("req_{}", i % 4);
        let to = format!("resp_{}", i % 5);
        let id = manager
            .create_elicitation(&from, &to, "work", object_schema(), Some(600), None)
            .await
            .unwrap();
        requests.push((id, from, to));
    }

    for (i, (id, from, to)) in requests.iter().enumerate() {
        let result = match i % 3 {
            0 => {
                manager
                    .respond_to_elicitation(id, to, ResponseType::Accept, Some(pong_payload()), None)
                    .await
            }
            1 => {
                manager
                    .respond_to_elicitation(id, to, ResponseType::Decline, None, None)
                    .await
            }
            _ => {
                manager
                    .respond_to_elicitation(id, from, ResponseType::Cancel, None, None)
                    .await
            }
        };
        result.unwrap();
    }

    // Re-read the log and check the responder on every terminal event.
    let by_id: BTreeMap<String, (String, String)> = requests
        .iter()
        .map(|(id, from, to)| (id.clone(), (from.clone(), to.clone())))
        .collect();

    for event in manager
        .store()
        .stream(shared_types::EventFilter::all(), 1)
        .unwrap()
    {
        let Some(tag) = event.data.get("elicitation_type").and_then(Value::as_str) else {
            continue;
        };
        let Some((from, to)) = by_id.get(&event.aggregate_id) else {
            continue;
        };
        let responder = event
            .data
            .get("responding_agent")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match tag {
            "elicitation_accepted" | "elicitation_declined" => assert_eq!(responder, to),
            "elicitation_cancelled" => assert_eq!(responder, from),
            _ => {}
        }
    }

    manager.shutdown().await;
}

/// Property 6 - Replay immunity: the failure count equals the replay
/// attempts.
#[tokio::test]
async fn property_replay_fail_count() {
    let temp = tempfile::tempdir().unwrap();
    let manager = open_manager(temp.path(), ElicitationConfig::durable()).await;

    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(30), None)
        .await
        .unwrap();
    manager
        .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
        .await
        .unwrap();

    const ATTEMPTS: usize = 7;
    let mut failures = 0;
    for _ in 0..ATTEMPTS {
        if manager
            .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
            .await
            .is_err()
        {
            failures += 1;
        }
    }
    assert_eq!(failures, ATTEMPTS);

    manager.shutdown().await;
}

/// Property 7 - Active requests never share a nonce.
#[tokio::test]
async fn property_nonce_uniqueness() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = ElicitationConfig::durable();
    config.rate_limits.max_requests_per_minute = 1000;
    let manager = open_manager(temp.path(), config).await;

    for i in 0..50 {
        manager
            .create_elicitation("agent_a", &format!("resp_{i}"), "work", object_schema(), Some(600), None)
            .await
            .unwrap();
    }

    let nonces: std::collections::BTreeSet<String> = manager
        .store()
        .stream(shared_types::EventFilter::all(), 1)
        .unwrap()
        .filter_map(|event| {
            event
                .data
                .get("nonce")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();
    assert_eq!(nonces.len(), 50, "all nonces distinct");

    manager.shutdown().await;
}

/// Property 8 - HMAC round trip: every persisted record verifies under
/// the store secret and fails under any other.
#[tokio::test]
async fn property_hmac_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());
    for i in 0..10 {
        store
            .append(simple_event(&format!("agg_{i}")), None)
            .await
            .unwrap();
    }
    store.shutdown().await;

    let segments = list_segments(&temp.path().join("events")).unwrap();
    assert!(!segments.is_empty());

    for segment in &segments {
        let content = read_segment(segment).unwrap();

        let mut good = RecordIter::new(SECRET, &content);
        let verified = good.by_ref().count();
        assert_eq!(good.skipped(), 0);
        assert!(verified > 0 || content.is_empty());

        let mut bad = RecordIter::new(b"wrong-secret", &content);
        assert_eq!(bad.by_ref().count(), 0);
        assert_eq!(bad.skipped(), verified as u64);
    }
}

/// Property 9 - Token bucket admission: capacity admitted immediately,
/// refill admitted over time.
#[test]
fn property_rate_limit_admission() {
    // Capacity 5, refill 20/sec.
    let mut bucket = TokenBucket::new(5.0, 20.0);

    let mut admitted = 0;
    for _ in 0..5 {
        if bucket.consume(1.0) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5, "full capacity admitted");
    assert!(!bucket.consume(1.0), "empty bucket refuses");

    // After 250 ms roughly R*T = 5 tokens are back; admit at least 3 to
    // stay robust against scheduler jitter.
    std::thread::sleep(std::time::Duration::from_millis(250));
    let mut refilled = 0;
    for _ in 0..10 {
        if bucket.consume(1.0) {
            refilled += 1;
        }
    }
    assert!((3..=6).contains(&refilled), "refill admitted {refilled}");
}

/// Property 10 - Session binding: no token mutation authenticates as a
/// different agent.
#[test]
fn property_session_binding() {
    use session_security::{SessionSecurityConfig, SessionSecurityValidator};

    let validator =
        SessionSecurityValidator::new(SECRET.to_vec(), SessionSecurityConfig::default());
    let session = validator.create_session("agent_a", "", "");
    let token = &session.session_token;

    // The genuine token authenticates only its own agent.
    assert!(validator.validate_session(token, "agent_a", "", "").is_ok());
    assert!(validator.validate_session(token, "agent_b", "", "").is_err());

    // Splice the agent field while keeping everything else.
    let spliced = token.replace("agent_a", "agent_b");
    assert!(validator.validate_session(&spliced, "agent_b", "", "").is_err());

    // Flip one signature character.
    let mut flipped = token.clone();
    let last = flipped.pop().unwrap();
    flipped.push(if last == '0' { '1' } else { '0' });
    assert!(validator.validate_session(&flipped, "agent_a", "", "").is_err());
}

/// Boundary - Event exactly at the 1 MiB bound is accepted; one byte
/// over is rejected.
#[tokio::test]
async fn boundary_event_size() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());

    // Calibrate the serialized overhead, then pad to the exact bound.
    let probe = {
        let mut data = BTreeMap::new();
        data.insert("blob".to_string(), Value::Str(String::new()));
        simple_event("boundary").with_data(data)
    };
    let overhead = probe.size_bytes();
    let fill = MAX_EVENT_SIZE_BYTES - overhead;

    let exact = {
        let mut data = BTreeMap::new();
        data.insert("blob".to_string(), Value::Str("x".repeat(fill)));
        simple_event("boundary").with_data(data)
    };
    assert_eq!(exact.size_bytes(), MAX_EVENT_SIZE_BYTES);
    assert!(store.append(exact, None).await.is_ok());

    let over = {
        let mut data = BTreeMap::new();
        data.insert("blob".to_string(), Value::Str("x".repeat(fill + 1)));
        simple_event("boundary").with_data(data)
    };
    assert_eq!(over.size_bytes(), MAX_EVENT_SIZE_BYTES + 1);
    let result = store.append(over, None).await;
    assert!(matches!(
        result,
        Err(EventStoreError::Security(_)) | Err(EventStoreError::SizeExceeded { .. })
    ));
}

/// Boundary - A batch of exactly 1000 events is accepted; 1001 is
/// rejected.
#[tokio::test]
async fn boundary_batch_count() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());

    let full: Vec<Event> = (0..MAX_BATCH_EVENTS)
        .map(|i| simple_event(&format!("agg_{i}")))
        .collect();
    let appended = store.append_batch(EventBatch::new(full), None).await.unwrap();
    assert_eq!(appended.len(), MAX_BATCH_EVENTS);

    let over: Vec<Event> = (0..=MAX_BATCH_EVENTS)
        .map(|i| simple_event(&format!("agg_{i}")))
        .collect();
    let result = store.append_batch(EventBatch::new(over), None).await;
    assert!(matches!(result, Err(EventStoreError::Security(_))));
}

/// Round trip - Append then query by aggregate returns the event
/// bit-exact.
#[tokio::test]
async fn roundtrip_append_query() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());

    let mut data = BTreeMap::new();
    data.insert("k".to_string(), Value::from("v"));
    data.insert("n".to_string(), Value::from(42u64));
    let event = Event::new(EventType::Custom, "roundtrip", "test")
        .with_data(data)
        .with_source_component("properties")
        .with_source_agent("agent_a");

    let appended = store.append(event, None).await.unwrap();

    let result = store
        .query(
            shared_types::EventQuery::with_filter(shared_types::EventFilter::for_aggregate(
                "roundtrip",
            )),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0], appended);
    assert_eq!(
        bincode::serialize(&result.events[0]).unwrap(),
        bincode::serialize(&appended).unwrap()
    );
}
