//! Literal end-to-end scenarios over the elicitation core.

use crate::harness::{object_schema, open_manager, pong_payload, reopen_manager, SECRET};
use elicitation::{
    ElicitationConfig, ElicitationError, ElicitationStatus, NonceStore, ResponseType,
};
use shared_types::{EventFilter, EventQuery, Value};
use std::time::Duration;

/// S1 - Happy path: create, accept, two events with consecutive
/// sequences.
#[tokio::test]
async fn scenario_happy_path() {
    let temp = tempfile::tempdir().unwrap();
    let manager = open_manager(temp.path(), ElicitationConfig::durable()).await;

    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(30), None)
        .await
        .unwrap();
    assert!(id.starts_with("elicit_"));
    assert_eq!(manager.get_pending_elicitations("agent_b").len(), 1);

    let accepted = manager
        .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
        .await
        .unwrap();
    assert!(accepted);

    assert!(manager.get_pending_elicitations("agent_b").is_empty());
    assert_eq!(
        manager.get_elicitation_status(&id).unwrap().status,
        ElicitationStatus::Accepted
    );

    let metrics = manager.get_metrics();
    assert_eq!(metrics.active_elicitations, 0);
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.total_responses, 1);

    // Two events in the log with consecutive sequences.
    let result = manager
        .store()
        .query(
            EventQuery::with_filter(EventFilter::for_aggregate(&id)),
            None,
        )
        .await
        .unwrap();
    let sequences: Vec<u64> = result.events.iter().filter_map(|e| e.sequence).collect();
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[1], sequences[0] + 1);

    manager.shutdown().await;
}

/// S2 - Impersonation blocked: a third agent cannot accept; the request
/// stays pending and the violation is audited.
#[tokio::test]
async fn scenario_impersonation_blocked() {
    let temp = tempfile::tempdir().unwrap();
    let manager = open_manager(temp.path(), ElicitationConfig::durable()).await;

    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(30), None)
        .await
        .unwrap();

    let result = manager
        .respond_to_elicitation(&id, "agent_c", ResponseType::Accept, Some(pong_payload()), None)
        .await;
    match result {
        Err(err @ ElicitationError::UnauthorizedResponse { .. }) => {
            assert_eq!(err.severity(), elicitation::Severity::Critical);
        }
        other => panic!("expected unauthorized response, got {other:?}"),
    }

    assert_eq!(manager.get_pending_elicitations("agent_b").len(), 1);
    assert_eq!(
        manager.get_elicitation_status(&id).unwrap().status,
        ElicitationStatus::Pending
    );
    assert_eq!(
        manager
            .audit()
            .violations_for("agent_c", "UNAUTHORIZED_ELICITATION_RESPONSE"),
        1
    );

    manager.shutdown().await;
}

/// S3 - Replay blocked: replaying a response payload hits `not_found`
/// (the request is terminal), and resubmitting a consumed raw nonce is a
/// replay.
#[tokio::test]
async fn scenario_replay_blocked() {
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

    let replay = manager
        .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
        .await;
    assert!(matches!(replay, Err(ElicitationError::NotFound { .. })));

    // The raw-nonce path: a consumed nonce keeps blocking reuse until its
    // TTL.
    let nonces = NonceStore::new();
    nonces.store_nonce("raw-nonce", "elicit_fresh", 30).unwrap();
    nonces.consume_nonce("raw-nonce").unwrap();
    assert!(nonces.store_nonce("raw-nonce", "elicit_other", 30).is_err());
    assert!(nonces.consume_nonce("raw-nonce").is_err());

    manager.shutdown().await;
}

/// S4 - Expiry: a short-timeout request expires; an expiry event with the
/// original id lands in the log past `created_at + timeout`.
#[tokio::test]
async fn scenario_expiry() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = ElicitationConfig::durable();
    config.expiry_sweep_interval = Duration::from_millis(50);
    let manager = open_manager(temp.path(), config).await;

    let created_at = shared_types::event::now_ms();
    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(1), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;

    // The sweep converted the request; a late response is refused.
    let late = manager
        .respond_to_elicitation(&id, "agent_b", ResponseType::Accept, Some(pong_payload()), None)
        .await;
    assert!(matches!(
        late,
        Err(ElicitationError::Expired { .. }) | Err(ElicitationError::NotFound { .. })
    ));
    assert_eq!(
        manager.get_elicitation_status(&id).unwrap().status,
        ElicitationStatus::Expired
    );

    // An expiry event with the original id exists in the log.
    let result = manager
        .store()
        .query(
            EventQuery::with_filter(EventFilter::for_aggregate(&id)),
            None,
        )
        .await
        .unwrap();
    let expired_at = result
        .events
        .iter()
        .find_map(|event| {
            let tag = event.data.get("elicitation_type")?.as_str()?;
            if tag != "elicitation_expired" {
                return None;
            }
            event.data.get("expired_at")?.as_u64()
        })
        .expect("expiry event present");
    assert!(expired_at >= created_at + 1000);

    manager.shutdown().await;
}

/// S5 - Rate limit: 13 creates back-to-back succeed (10/min + 3 burst),
/// the 14th fails with one recorded violation.
#[tokio::test]
async fn scenario_rate_limit() {
    let temp = tempfile::tempdir().unwrap();
    let manager = open_manager(temp.path(), ElicitationConfig::durable()).await;

    for i in 0..13 {
        manager
            .create_elicitation(
                "agent_a",
                "agent_b",
                &format!("ping {i}"),
                object_schema(),
                Some(30),
                None,
            )
            .await
            .unwrap_or_else(|e| panic!("create {i} failed: {e}"));
    }

    let result = manager
        .create_elicitation("agent_a", "agent_b", "one more", object_schema(), Some(30), None)
        .await;
    assert!(matches!(
        result,
        Err(ElicitationError::RateLimitExceeded { .. })
    ));
    assert_eq!(manager.get_metrics().rate_limit_violations, 1);

    manager.shutdown().await;
}

/// S6 - Rebuild equivalence: after a random mix of operations, a restart
/// rebuilds a byte-equal projection.
#[tokio::test]
async fn scenario_rebuild_equivalence() {
    use rand::prelude::*;

    let temp = tempfile::tempdir().unwrap();
    let mut config = ElicitationConfig::durable();
    // Plenty of budget for the randomized burst.
    config.rate_limits.max_requests_per_minute = 10_000;
    config.rate_limits.max_responses_per_minute = 10_000;
    let manager = open_manager(temp.path(), config.clone()).await;

    let mut rng = StdRng::seed_from_u64(0xE11C);
    let agents: Vec<String> = (0..10).map(|i| format!("agent_{i:02}")).collect();
    let mut open_requests: Vec<(String, String, String)> = Vec::new();

    for _ in 0..300 {
        let roll: f64 = rng.gen();
        if roll < 0.5 || open_requests.is_empty() {
            let from = agents.choose(&mut rng).unwrap().clone();
            let mut to = agents.choose(&mut rng).unwrap().clone();
            while to == from {
                to = agents.choose(&mut rng).unwrap().clone();
            }
            let id = manager
                .create_elicitation(&from, &to, "work request", object_schema(), Some(600), None)
                .await
                .unwrap();
            open_requests.push((id, from, to));
        } else {
            let index = rng.gen_range(0..open_requests.len());
            let (id, from, to) = open_requests.swap_remove(index);
            let action: f64 = rng.gen();
            let outcome = if action < 0.5 {
                manager
                    .respond_to_elicitation(
                        &id,
                        &to,
                        ResponseType::Accept,
                        Some(pong_payload()),
                        None,
                    )
                    .await
            } else if action < 0.8 {
                manager
                    .respond_to_elicitation(&id, &to, ResponseType::Decline, None, None)
                    .await
            } else {
                manager
                    .respond_to_elicitation(&id, &from, ResponseType::Cancel, None, None)
                    .await
            };
            outcome.unwrap();
        }
    }

    let live = manager.projection_bytes();
    manager.shutdown().await;

    let rebuilt = reopen_manager(temp.path(), config).await;
    assert_eq!(
        rebuilt.projection_bytes(),
        live,
        "rebuilt projection must be byte-equal"
    );
    rebuilt.shutdown().await;
}

/// Snapshot-then-rebuild equals full rebuild.
#[tokio::test]
async fn scenario_snapshot_rebuild_equivalence() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = ElicitationConfig::durable();
    config.snapshot_threshold = 5;
    config.snapshot_sweep_interval = Duration::from_millis(50);
    config.rate_limits.max_requests_per_minute = 1000;
    let manager = open_manager(temp.path(), config.clone()).await;

    for i in 0..20 {
        let id = manager
            .create_elicitation(
                "agent_a",
                "agent_b",
                &format!("batch {i}"),
                object_schema(),
                Some(600),
                None,
            )
            .await
            .unwrap();
        if i % 2 == 0 {
            manager
                .respond_to_elicitation(&id, "agent_b", ResponseType::Decline, None, None)
                .await
                .unwrap();
        }
    }

    // Let the snapshot sweep land at least once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let live = manager.projection_bytes();
    manager.shutdown().await;

    // Restart resumes from the snapshot plus the log tail.
    let revived = reopen_manager(temp.path(), config).await;
    assert_eq!(revived.projection_bytes(), live);
    revived.shutdown().await;
}

/// The session validator gates responses when wired in.
#[tokio::test]
async fn scenario_session_gated_response() {
    use session_security::{SessionSecurityConfig, SessionSecurityValidator};
    use std::sync::Arc;

    let temp = tempfile::tempdir().unwrap();
    let store = crate::harness::open_store(temp.path());
    let validator = Arc::new(SessionSecurityValidator::new(
        SECRET.to_vec(),
        SessionSecurityConfig::default(),
    ));

    let manager = Arc::new(
        elicitation::ElicitationManager::new(
            store,
            SECRET.to_vec(),
            ElicitationConfig::durable(),
        )
        .unwrap()
        .with_session_validator(Arc::clone(&validator)),
    );
    manager.initialize().await.unwrap();

    let id = manager
        .create_elicitation("agent_a", "agent_b", "ping", object_schema(), Some(30), None)
        .await
        .unwrap();

    // A forged token is refused before any state changes.
    let forged = manager
        .respond_to_elicitation(
            &id,
            "agent_b",
            ResponseType::Accept,
            Some(pong_payload()),
            Some("forged:token:1:deadbeef"),
        )
        .await;
    assert!(matches!(forged, Err(ElicitationError::InvalidSession { .. })));

    // A real session for agent_b passes.
    let session = validator.create_session("agent_b", "", "");
    let accepted = manager
        .respond_to_elicitation(
            &id,
            "agent_b",
            ResponseType::Accept,
            Some(pong_payload()),
            Some(&session.session_token),
        )
        .await
        .unwrap();
    assert!(accepted);

    manager.shutdown().await;
}

/// Expert coordination rides the same event store as the manager.
#[tokio::test]
async fn scenario_coordination_shares_event_store() {
    use event_store::AgentRole;
    use expert_coordination::{
        CoordinatorConfig, ExpertCapability, ExpertCoordinator,
    };
    use std::collections::BTreeSet;
    use std::sync::Arc;

    let temp = tempfile::tempdir().unwrap();
    let store = crate::harness::open_store(temp.path());

    let coordinator = Arc::new(ExpertCoordinator::new(
        Arc::clone(&store),
        SECRET.to_vec(),
        CoordinatorConfig::default(),
    ));

    let identity = event_store::AgentIdentity {
        agent_id: "expert_a".to_string(),
        role: AgentRole::ExpertAgent,
        permissions: AgentRole::ExpertAgent.permissions(),
        allowed_aggregates: BTreeSet::new(),
        allowed_streams: BTreeSet::new(),
        max_requests_per_minute: 2000,
        max_batch_size: 500,
        authenticated_at: 0,
        expires_at: None,
    };
    let challenge = coordinator.registration_challenge("expert_a");
    let _token = coordinator
        .register_expert(
            identity,
            vec![ExpertCapability::named("review", "code review")],
            &challenge,
        )
        .await
        .unwrap();

    // The registration left an audit trail in the shared log.
    let result = store
        .query(
            EventQuery::with_filter(EventFilter::for_aggregate_type("expert_coordination")),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.events.len(), 1);
    assert_eq!(
        result.events[0].data.get("capabilities"),
        Some(&Value::List(vec![Value::from("review")]))
    );
}
