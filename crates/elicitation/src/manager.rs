//! # Secure Elicitation Manager
//!
//! Event-sourced elicitation lifecycle with cryptographic authorization.
//! All mutation flows through event-store append plus a short projection
//! critical section; the manager holds no long-lived lock.
//!
//! ## Profiles
//!
//! The durable profile appends synchronously and audits on the hot path.
//! The fast profile batches event writes (10 events or 100 ms), routes
//! audit persistence through a bounded channel, caches request signatures,
//! and uses 16-byte nonces. Both preserve every correctness invariant;
//! the fast profile relaxes only the synchronous durability of the audit
//! trail.

use crate::audit::{AuditChannel, AuditEntry, AuditLogger, PersistAction, Severity};
use crate::errors::ElicitationError;
use crate::events::{
    created_event, expired_event, responded_event, security_event, ElicitationEventKind,
    AGGREGATE_ELICITATION, AGGREGATE_ELICITATION_SECURITY,
};
use crate::flags::FeatureFlagStore;
use crate::models::{
    ElicitationMetrics, ElicitationRequest, ElicitationStatus, ElicitationStatusView,
    PendingElicitation, ResponseType,
};
use crate::nonce::NonceStore;
use crate::notify::{NotificationHub, NotificationStream, NotificationType};
use crate::projection::ElicitationProjection;
use crate::rate_limit::{ElicitationRateLimiter, RateLimiterConfig};
use event_store::{EventStore, SnapshotStore};
use session_security::SessionSecurityValidator;
use shared_crypto::{hmac_sha256_hex, random_hex, sha256_hex};
use shared_types::event::now_ms;
use shared_types::{Event, EventBatch, EventFilter, EventType, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Event-write batching for the fast profile.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Flush once this many events are buffered.
    pub max_events: usize,
    /// Flush at least this often.
    pub window: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_events: 10,
            window: Duration::from_millis(100),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ElicitationConfig {
    /// Default request timeout when the caller passes none.
    pub default_timeout_secs: u64,
    /// Expiry sweep cadence.
    pub expiry_sweep_interval: Duration,
    /// Snapshot sweep cadence.
    pub snapshot_sweep_interval: Duration,
    /// Events since the last snapshot that trigger a new one.
    pub snapshot_threshold: u64,
    /// Metrics sweep cadence.
    pub metrics_sweep_interval: Duration,
    /// Nonce cleanup cadence.
    pub nonce_cleanup_interval: Duration,
    /// Operation timing retention.
    pub timing_window: Duration,
    /// Random bytes per nonce (minimum 16 = 128 bits).
    pub nonce_bytes: usize,
    /// Event-write batching; `None` appends synchronously.
    pub batching: Option<BatchingConfig>,
    /// Route audit persistence through the bounded channel.
    pub async_audit: bool,
    /// Audit channel depth.
    pub audit_channel_capacity: usize,
    /// Cache request signatures by `(from, to, message-prefix)`.
    pub signature_cache: bool,
    /// Re-verify request signatures while rebuilding the projection.
    pub verify_signatures_on_read: bool,
    /// Rate limiter settings.
    pub rate_limits: RateLimiterConfig,
}

impl ElicitationConfig {
    /// Durable profile: synchronous appends and audit writes.
    #[must_use]
    pub fn durable() -> Self {
        Self {
            default_timeout_secs: 30,
            expiry_sweep_interval: Duration::from_secs(10),
            snapshot_sweep_interval: Duration::from_secs(60),
            snapshot_threshold: 1000,
            metrics_sweep_interval: Duration::from_secs(30),
            nonce_cleanup_interval: Duration::from_secs(3600),
            timing_window: Duration::from_secs(3600),
            nonce_bytes: 32,
            batching: None,
            async_audit: false,
            audit_channel_capacity: 1000,
            signature_cache: false,
            verify_signatures_on_read: false,
            rate_limits: RateLimiterConfig::default(),
        }
    }

    /// Fast profile for latency-critical deployments.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            nonce_bytes: 16,
            batching: Some(BatchingConfig::default()),
            async_audit: true,
            signature_cache: true,
            ..Self::durable()
        }
    }
}

impl Default for ElicitationConfig {
    fn default() -> Self {
        Self::durable()
    }
}

/// Cap on cached request signatures.
const SIGNATURE_CACHE_CAPACITY: usize = 1000;
/// Message prefix length used as the cache key.
const SIGNATURE_CACHE_PREFIX: usize = 32;

/// Cryptographically secure, event-sourced elicitation manager.
pub struct ElicitationManager {
    store: Arc<EventStore>,
    snapshots: SnapshotStore,
    secret: Vec<u8>,
    config: ElicitationConfig,

    projection: RwLock<ElicitationProjection>,
    rate_limiter: ElicitationRateLimiter,
    nonce_store: NonceStore,
    audit: AuditLogger,
    notifications: NotificationHub,

    session_validator: Option<Arc<SessionSecurityValidator>>,
    flags: Option<Arc<FeatureFlagStore>>,

    /// (recorded at ms, latency ms) for the trailing window.
    op_times: Mutex<VecDeque<(u64, f64)>>,
    signature_cache: Mutex<HashMap<String, String>>,
    signature_read_failures: Mutex<u64>,

    batch_buffer: AsyncMutex<Vec<Event>>,
    audit_receiver: Mutex<Option<mpsc::Receiver<AuditEntry>>>,

    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ElicitationManager {
    /// Create a manager over the given store.
    ///
    /// # Errors
    ///
    /// Fails when the snapshot directory cannot be created.
    pub fn new(
        store: Arc<EventStore>,
        secret: impl Into<Vec<u8>>,
        config: ElicitationConfig,
    ) -> Result<Self, ElicitationError> {
        let data_dir = store.config().data_dir.clone();
        let snapshot_dir = data_dir
            .parent()
            .map(|parent| parent.join("snapshots"))
            .unwrap_or_else(|| data_dir.join("snapshots"));
        let snapshots = SnapshotStore::open(snapshot_dir)
            .map_err(|e| ElicitationError::InvalidInput {
                message: format!("snapshot directory unavailable: {e}"),
            })?;

        let (audit, audit_receiver) = if config.async_audit {
            let (channel, receiver) = AuditChannel::new(config.audit_channel_capacity);
            (AuditLogger::with_channel(channel), Some(receiver))
        } else {
            (AuditLogger::new(), None)
        };

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            rate_limiter: ElicitationRateLimiter::new(config.rate_limits.clone()),
            store,
            snapshots,
            secret: secret.into(),
            config,
            projection: RwLock::new(ElicitationProjection::default()),
            nonce_store: NonceStore::new(),
            audit,
            notifications: NotificationHub::new(),
            session_validator: None,
            flags: None,
            op_times: Mutex::new(VecDeque::new()),
            signature_cache: Mutex::new(HashMap::new()),
            signature_read_failures: Mutex::new(0),
            batch_buffer: AsyncMutex::new(Vec::new()),
            audit_receiver: Mutex::new(audit_receiver),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Gate requester and responder actions on session validation.
    #[must_use]
    pub fn with_session_validator(mut self, validator: Arc<SessionSecurityValidator>) -> Self {
        self.session_validator = Some(validator);
        self
    }

    /// Honor the emergency-rollback feature flag.
    #[must_use]
    pub fn with_feature_flags(mut self, flags: Arc<FeatureFlagStore>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Rebuild state from the log and start the background sweeps.
    ///
    /// # Errors
    ///
    /// Fails when the event log cannot be read.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ElicitationError> {
        info!("Initializing elicitation manager");
        let started = Instant::now();

        let events_applied = self.rebuild_projection()?;
        self.reseed_nonces();
        self.spawn_background_tasks();

        let active = lock_read(&self.projection).active_elicitations.len();
        info!(
            events_applied,
            active_elicitations = active,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Elicitation manager initialized"
        );
        Ok(())
    }

    /// Signal the sweeps, flush buffered events, drain the audit channel,
    /// and wait for every background task.
    pub async fn shutdown(&self) {
        info!("Shutting down elicitation manager");
        let _ = self.shutdown.send(true);

        self.flush_batch().await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            let _ = handle.await;
        }
        info!("Elicitation manager shutdown complete");
    }

    /// Create a cryptographically secure elicitation request.
    ///
    /// # Errors
    ///
    /// - `EmergencyRollback` while the rollback flag is set.
    /// - `InvalidSession` when the presented token fails validation.
    /// - `RateLimitExceeded` when the requester bucket is empty.
    /// - `NonceStoreFailure` on nonce collision.
    /// - `InvalidInput` for malformed arguments.
    /// - `Store` when the append fails.
    pub async fn create_elicitation(
        &self,
        from_agent: &str,
        to_agent: &str,
        message: &str,
        schema: Value,
        timeout_secs: Option<u64>,
        agent_token: Option<&str>,
    ) -> Result<String, ElicitationError> {
        let started = Instant::now();
        self.ensure_running()?;

        if self
            .flags
            .as_ref()
            .is_some_and(|flags| flags.emergency_rollback_active())
        {
            return Err(ElicitationError::EmergencyRollback);
        }

        if from_agent.is_empty() || to_agent.is_empty() {
            return Err(ElicitationError::InvalidInput {
                message: "from_agent and to_agent must be non-empty".to_string(),
            });
        }
        if !matches!(schema, Value::Map(_)) {
            return Err(ElicitationError::InvalidInput {
                message: "schema must be an object".to_string(),
            });
        }

        self.validate_agent_session(from_agent, agent_token, None)
            .await?;

        if !self.rate_limiter.allow_request(from_agent) {
            self.record_violation(
                "RATE_LIMIT_EXCEEDED",
                from_agent,
                None,
                Severity::Medium,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::RateLimitExceeded {
                agent_id: from_agent.to_string(),
            });
        }

        let elicitation_id = format!("elicit_{}", random_hex(8));
        let nonce = random_hex(self.config.nonce_bytes);
        let timeout = timeout_secs.unwrap_or(self.config.default_timeout_secs);

        self.nonce_store
            .store_nonce(&nonce, &elicitation_id, timeout)
            .map_err(|_| ElicitationError::NonceStoreFailure)?;

        let created_at_ms = now_ms();
        let expires_at_ms = created_at_ms + timeout * 1000;

        let request_signature = self.sign_request(
            &elicitation_id,
            from_agent,
            to_agent,
            message,
            &schema,
            &nonce,
            created_at_ms,
        );
        let expected_response_key = self.response_key(&elicitation_id, to_agent, &nonce);

        let request = ElicitationRequest {
            id: elicitation_id.clone(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            message: message.to_string(),
            schema,
            nonce,
            request_signature,
            expected_response_key,
            timeout_seconds: timeout,
            created_at_ms,
            expires_at_ms,
            status: ElicitationStatus::Pending,
            sequence: None,
            response_type: None,
            responded_at_ms: None,
        };

        let writer = agent_token.is_some().then_some(from_agent);
        self.append_domain_event(created_event(&request), writer)
            .await?;

        let mut details = BTreeMap::new();
        details.insert("to_agent".to_string(), Value::from(to_agent));
        details.insert(
            "message_hash".to_string(),
            Value::from(sha256_hex(message.as_bytes())),
        );
        self.record_lifecycle("ELICITATION_CREATED", from_agent, &elicitation_id, details)
            .await;

        self.notifications.notify(
            to_agent,
            NotificationType::ElicitationRequest,
            &elicitation_id,
        );

        self.record_op_time(started);
        info!(
            %elicitation_id,
            from_agent, to_agent, timeout, "Created elicitation"
        );
        Ok(elicitation_id)
    }

    /// Respond to an elicitation with cryptographic verification.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the request is unknown or already terminal.
    /// - `UnauthorizedResponse` / `UnauthorizedCancel` on identity
    ///   mismatch (critical / high severity, audited).
    /// - `Expired` past the deadline.
    /// - `RateLimitExceeded` when the responder bucket is empty.
    /// - `SchemaViolation` when accept data misses required fields.
    /// - `SignatureMismatch` when the response key does not bind.
    /// - `ReplayAttack` on nonce reuse.
    pub async fn respond_to_elicitation(
        &self,
        elicitation_id: &str,
        responding_agent: &str,
        response_type: ResponseType,
        data: Option<Value>,
        agent_token: Option<&str>,
    ) -> Result<bool, ElicitationError> {
        let started = Instant::now();
        self.ensure_running()?;

        self.validate_agent_session(responding_agent, agent_token, Some(elicitation_id))
            .await?;

        let request = {
            let projection = lock_read(&self.projection);
            projection.active_elicitations.get(elicitation_id).cloned()
        };
        let Some(request) = request else {
            self.record_violation(
                "ELICITATION_NOT_FOUND",
                responding_agent,
                Some(elicitation_id),
                Severity::Medium,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::NotFound {
                elicitation_id: elicitation_id.to_string(),
            });
        };

        // Addressed-responder check: only the named responder may
        // accept/decline, and only the requester may cancel.
        match response_type {
            ResponseType::Accept | ResponseType::Decline => {
                if request.to_agent != responding_agent {
                    let mut details = BTreeMap::new();
                    details.insert(
                        "expected_agent".to_string(),
                        Value::from(request.to_agent.as_str()),
                    );
                    self.record_violation(
                        "UNAUTHORIZED_ELICITATION_RESPONSE",
                        responding_agent,
                        Some(elicitation_id),
                        Severity::Critical,
                        details,
                    )
                    .await;
                    return Err(ElicitationError::UnauthorizedResponse {
                        agent_id: responding_agent.to_string(),
                        expected_agent: request.to_agent.clone(),
                        elicitation_id: elicitation_id.to_string(),
                    });
                }
            }
            ResponseType::Cancel => {
                if request.from_agent != responding_agent {
                    self.record_violation(
                        "UNAUTHORIZED_CANCEL",
                        responding_agent,
                        Some(elicitation_id),
                        Severity::High,
                        BTreeMap::new(),
                    )
                    .await;
                    return Err(ElicitationError::UnauthorizedCancel {
                        agent_id: responding_agent.to_string(),
                        owner: request.from_agent.clone(),
                        elicitation_id: elicitation_id.to_string(),
                    });
                }
            }
        }

        let responded_at_ms = now_ms();
        if request.is_expired(responded_at_ms) {
            debug!(elicitation_id, "Response to expired elicitation refused");
            return Err(ElicitationError::Expired {
                elicitation_id: elicitation_id.to_string(),
            });
        }

        if !self.rate_limiter.allow_response(responding_agent) {
            self.record_violation(
                "RATE_LIMIT_EXCEEDED",
                responding_agent,
                Some(elicitation_id),
                Severity::Medium,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::RateLimitExceeded {
                agent_id: responding_agent.to_string(),
            });
        }

        if response_type == ResponseType::Accept {
            if let Some(data) = &data {
                if let Some(missing) = schema_missing_field(&request.schema, data) {
                    self.record_violation(
                        "VALIDATION_FAILURE",
                        responding_agent,
                        Some(elicitation_id),
                        Severity::Medium,
                        BTreeMap::new(),
                    )
                    .await;
                    return Err(ElicitationError::SchemaViolation {
                        elicitation_id: elicitation_id.to_string(),
                        missing_field: missing,
                    });
                }
            }
        }

        // The response key must derive from the addressed agent; an
        // impersonated identity cannot reconstruct it.
        let derived_key = self.response_key(elicitation_id, &request.to_agent, &request.nonce);
        if derived_key != request.expected_response_key {
            self.record_violation(
                "UNAUTHORIZED_ELICITATION_RESPONSE",
                responding_agent,
                Some(elicitation_id),
                Severity::Critical,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::SignatureMismatch {
                elicitation_id: elicitation_id.to_string(),
            });
        }

        if self.nonce_store.consume_nonce(&request.nonce).is_err() {
            self.record_violation(
                "REPLAY_ATTACK_PREVENTED",
                responding_agent,
                Some(elicitation_id),
                Severity::Critical,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::ReplayAttack {
                elicitation_id: elicitation_id.to_string(),
            });
        }

        let response_signature = self.sign_response(
            &request.expected_response_key,
            elicitation_id,
            responding_agent,
            response_type,
            data.as_ref(),
            &request.nonce,
            responded_at_ms,
        );

        let kind = match response_type {
            ResponseType::Accept => ElicitationEventKind::Accepted,
            ResponseType::Decline => ElicitationEventKind::Declined,
            ResponseType::Cancel => ElicitationEventKind::Cancelled,
        };
        let event = responded_event(
            elicitation_id,
            kind,
            responding_agent,
            data.as_ref(),
            &response_signature,
            responded_at_ms,
            request.sequence,
        );

        let writer = agent_token.is_some().then_some(responding_agent);
        self.append_domain_event(event, writer).await?;

        let mut details = BTreeMap::new();
        details.insert(
            "response_type".to_string(),
            Value::from(response_type.as_str()),
        );
        if let Some(data) = &data {
            details.insert(
                "data_hash".to_string(),
                Value::from(sha256_hex(&data.canonical_json())),
            );
        }
        self.record_lifecycle(
            "ELICITATION_RESPONSE",
            responding_agent,
            elicitation_id,
            details,
        )
        .await;

        self.notifications.notify(
            &request.from_agent,
            NotificationType::ElicitationResponse,
            elicitation_id,
        );

        self.record_op_time(started);
        info!(
            elicitation_id,
            responding_agent,
            response_type = response_type.as_str(),
            "Processed elicitation response"
        );
        Ok(true)
    }

    /// Pending elicitations addressed to an agent, as safe views.
    #[must_use]
    pub fn get_pending_elicitations(&self, agent_id: &str) -> Vec<PendingElicitation> {
        let projection = lock_read(&self.projection);
        projection
            .pending_for(agent_id)
            .into_iter()
            .map(PendingElicitation::from)
            .collect()
    }

    /// Status of a single elicitation.
    #[must_use]
    pub fn get_elicitation_status(&self, elicitation_id: &str) -> Option<ElicitationStatusView> {
        let projection = lock_read(&self.projection);

        if let Some(request) = projection.active_elicitations.get(elicitation_id) {
            return Some(ElicitationStatusView {
                status: request.status,
                created_at_ms: request.created_at_ms,
                expires_at_ms: Some(request.expires_at_ms),
                responded_at_ms: None,
            });
        }
        projection
            .completed_elicitations
            .get(elicitation_id)
            .map(|request| ElicitationStatusView {
                status: request.status,
                created_at_ms: request.created_at_ms,
                expires_at_ms: None,
                responded_at_ms: request.responded_at_ms,
            })
    }

    /// Subscribe to elicitation notifications for an agent.
    #[must_use]
    pub fn subscribe_to_notifications(&self, agent_id: &str) -> NotificationStream {
        self.notifications.subscribe(agent_id)
    }

    /// Current performance and security metrics.
    #[must_use]
    pub fn get_metrics(&self) -> ElicitationMetrics {
        let mut metrics = ElicitationMetrics::default();

        {
            let op_times = lock(&self.op_times);
            let mut latencies: Vec<f64> = op_times.iter().map(|(_, ms)| *ms).collect();
            latencies.sort_by(f64::total_cmp);
            metrics.p50_latency_ms = percentile(&latencies, 0.50);
            metrics.p95_latency_ms = percentile(&latencies, 0.95);
            metrics.p99_latency_ms = percentile(&latencies, 0.99);
        }

        {
            let projection = lock_read(&self.projection);
            metrics.active_elicitations = projection.active_elicitations.len();
            metrics.pending_elicitations = projection
                .active_elicitations
                .values()
                .filter(|request| request.status == ElicitationStatus::Pending)
                .count();
            metrics.total_requests = projection.total_requests;
            metrics.total_responses = projection.total_responses;
            metrics.total_timeouts = projection.total_timeouts;

            if projection.total_requests > 0 {
                metrics.delivery_rate =
                    projection.total_responses as f64 / projection.total_requests as f64;
                metrics.timeout_rate =
                    projection.total_timeouts as f64 / projection.total_requests as f64;
            }
        }

        metrics.rate_limit_violations = self.rate_limiter.total_violations();
        metrics.impersonation_attempts = self
            .audit
            .count_by_type("UNAUTHORIZED_ELICITATION_RESPONSE");
        metrics.replay_attempts = self.audit.count_by_type("REPLAY_ATTACK_PREVENTED");
        metrics.notification_drops =
            self.notifications.dropped() + self.notifications.undeliverable();

        metrics
    }

    /// The audit logger, for introspection.
    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// The backing event store.
    #[must_use]
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Canonical bytes of the current projection (purity checks).
    #[must_use]
    pub fn projection_bytes(&self) -> Vec<u8> {
        lock_read(&self.projection).canonical_bytes()
    }

    // ----- internal machinery -----

    fn ensure_running(&self) -> Result<(), ElicitationError> {
        if *self.shutdown.borrow() {
            Err(ElicitationError::Shutdown)
        } else {
            Ok(())
        }
    }

    async fn validate_agent_session(
        &self,
        agent_id: &str,
        agent_token: Option<&str>,
        elicitation_id: Option<&str>,
    ) -> Result<(), ElicitationError> {
        let (Some(validator), Some(token)) = (&self.session_validator, agent_token) else {
            return Ok(());
        };

        if let Err(error) = validator.validate_session(token, agent_id, "", "") {
            debug!(agent_id, %error, "Session validation failed");
            self.record_violation(
                "INVALID_SESSION_RESPONSE",
                agent_id,
                elicitation_id,
                Severity::High,
                BTreeMap::new(),
            )
            .await;
            return Err(ElicitationError::InvalidSession {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(())
    }

    /// Append a domain event and fold it into the projection.
    async fn append_domain_event(
        &self,
        event: Event,
        agent_id: Option<&str>,
    ) -> Result<(), ElicitationError> {
        if self.config.batching.is_some() {
            // Optimistic projection update; the flush enriches sequence
            // bookkeeping once the batch is durable.
            self.apply_to_projection(&event);

            let flush_now = {
                let mut buffer = self.batch_buffer.lock().await;
                buffer.push(event);
                self.config
                    .batching
                    .as_ref()
                    .is_some_and(|batching| buffer.len() >= batching.max_events)
            };
            if flush_now {
                self.flush_batch().await;
            }
            Ok(())
        } else {
            let appended = self.store.append(event, agent_id).await?;
            self.apply_to_projection(&appended);
            Ok(())
        }
    }

    /// Flush buffered events as one atomic batch.
    async fn flush_batch(&self) {
        let events = {
            let mut buffer = self.batch_buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if events.is_empty() {
            return;
        }

        let count = events.len();
        match self.store.append_batch(EventBatch::new(events), None).await {
            Ok(appended) => {
                for event in &appended {
                    self.apply_to_projection(event);
                }
                debug!(count, "Flushed event batch");
            }
            Err(err) => {
                error!(%err, count, "Event batch flush failed; events lost");
            }
        }
    }

    fn apply_to_projection(&self, event: &Event) {
        let mut projection = match self.projection.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        projection.apply(event);
    }

    async fn record_violation(
        &self,
        violation_type: &str,
        agent: &str,
        elicitation_id: Option<&str>,
        severity: Severity,
        details: BTreeMap<String, Value>,
    ) {
        let entry = AuditEntry::violation(violation_type, agent, elicitation_id, severity, details);
        if let PersistAction::Persist(entry) = self.audit.record(entry) {
            self.persist_security_entry(entry).await;
        }
    }

    async fn record_lifecycle(
        &self,
        event_type: &str,
        agent: &str,
        elicitation_id: &str,
        details: BTreeMap<String, Value>,
    ) {
        let entry = AuditEntry::lifecycle(event_type, agent, elicitation_id, details);
        if let PersistAction::Persist(entry) = self.audit.record(entry) {
            self.persist_security_entry(entry).await;
        }
    }

    /// Persist a high/critical audit entry as a standalone security event.
    async fn persist_security_entry(&self, entry: AuditEntry) {
        let event = security_event(
            &entry.event_type,
            &entry.agent,
            entry.severity,
            entry.elicitation_id.as_deref(),
            entry.details.clone(),
        );
        match self.store.append(event, None).await {
            Ok(appended) => self.apply_to_projection(&appended),
            Err(err) => warn!(%err, event_type = %entry.event_type, "Security event persistence failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_request(
        &self,
        elicitation_id: &str,
        from_agent: &str,
        to_agent: &str,
        message: &str,
        schema: &Value,
        nonce: &str,
        created_at_ms: u64,
    ) -> String {
        if self.config.signature_cache {
            let prefix = message.get(..SIGNATURE_CACHE_PREFIX).unwrap_or(message);
            let cache_key = format!("{from_agent}:{to_agent}:{prefix}");

            let mut cache = lock(&self.signature_cache);
            if let Some(signature) = cache.get(&cache_key) {
                return signature.clone();
            }
            let signature = self.compute_request_signature(
                elicitation_id,
                from_agent,
                to_agent,
                message,
                schema,
                nonce,
                created_at_ms,
            );
            if cache.len() >= SIGNATURE_CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(cache_key, signature.clone());
            return signature;
        }

        self.compute_request_signature(
            elicitation_id,
            from_agent,
            to_agent,
            message,
            schema,
            nonce,
            created_at_ms,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_request_signature(
        &self,
        elicitation_id: &str,
        from_agent: &str,
        to_agent: &str,
        message: &str,
        schema: &Value,
        nonce: &str,
        created_at_ms: u64,
    ) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("created_at".to_string(), Value::from(created_at_ms));
        fields.insert("from_agent".to_string(), Value::from(from_agent));
        fields.insert("id".to_string(), Value::from(elicitation_id));
        fields.insert("message".to_string(), Value::from(message));
        fields.insert("nonce".to_string(), Value::from(nonce));
        fields.insert("schema".to_string(), schema.clone());
        fields.insert("to_agent".to_string(), Value::from(to_agent));

        hmac_sha256_hex(&self.secret, &Value::Map(fields).canonical_json())
    }

    fn response_key(&self, elicitation_id: &str, to_agent: &str, nonce: &str) -> String {
        let secret = String::from_utf8_lossy(&self.secret);
        sha256_hex(format!("{elicitation_id}:{to_agent}:{nonce}:{secret}").as_bytes())
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_response(
        &self,
        expected_key: &str,
        elicitation_id: &str,
        responding_agent: &str,
        response_type: ResponseType,
        data: Option<&Value>,
        nonce: &str,
        responded_at_ms: u64,
    ) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("data".to_string(), data.cloned().unwrap_or(Value::Null));
        fields.insert("id".to_string(), Value::from(elicitation_id));
        fields.insert("nonce".to_string(), Value::from(nonce));
        fields.insert("responded_at".to_string(), Value::from(responded_at_ms));
        fields.insert("responder".to_string(), Value::from(responding_agent));
        fields.insert(
            "response_type".to_string(),
            Value::from(response_type.as_str()),
        );

        hmac_sha256_hex(
            expected_key.as_bytes(),
            &Value::Map(fields).canonical_json(),
        )
    }

    fn record_op_time(&self, started: Instant) {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        lock(&self.op_times).push_back((now_ms(), latency_ms));
    }

    /// Rebuild the projection from the latest snapshot plus the log tail.
    fn rebuild_projection(&self) -> Result<u64, ElicitationError> {
        let mut projection = match self.snapshots.load_latest::<ElicitationProjection>() {
            Ok(Some((manifest, restored))) => {
                info!(
                    snapshot_sequence = manifest.event_sequence,
                    "Restoring projection from snapshot"
                );
                restored
            }
            Ok(None) => ElicitationProjection::default(),
            Err(error) => {
                warn!(%error, "Snapshot load failed, rebuilding from scratch");
                ElicitationProjection::default()
            }
        };

        let filter = EventFilter {
            event_types: Some(vec![EventType::Custom]),
            aggregate_types: Some(vec![
                AGGREGATE_ELICITATION.to_string(),
                AGGREGATE_ELICITATION_SECURITY.to_string(),
            ]),
            ..EventFilter::default()
        };

        let start_sequence = projection.last_sequence + 1;
        let mut applied = 0u64;
        for event in self.store.stream(filter, start_sequence)? {
            if self.config.verify_signatures_on_read {
                self.verify_read_signature(&event);
            }
            projection.apply(&event);
            applied += 1;
        }

        *match self.projection.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        } = projection;

        Ok(applied)
    }

    /// Re-verify the stored request signature of a replayed event.
    fn verify_read_signature(&self, event: &Event) {
        let Some(tag) = event.data.get("elicitation_type").and_then(Value::as_str) else {
            return;
        };
        if tag != ElicitationEventKind::Requested.as_str() {
            return;
        }

        let recompute = (|| -> Option<bool> {
            let signature = event.data.get("request_signature")?.as_str()?;
            let expected = self.compute_request_signature(
                &event.aggregate_id,
                event.data.get("from_agent")?.as_str()?,
                event.data.get("to_agent")?.as_str()?,
                event.data.get("message")?.as_str()?,
                event.data.get("schema")?,
                event.data.get("nonce")?.as_str()?,
                event.data.get("created_at")?.as_u64()?,
            );
            Some(expected == signature)
        })();

        if recompute != Some(true) {
            *lock(&self.signature_read_failures) += 1;
            warn!(
                elicitation_id = %event.aggregate_id,
                "Request signature failed read-side verification"
            );
        }
    }

    /// Re-register nonces of still-active requests so responses keep
    /// working after a restart.
    fn reseed_nonces(&self) {
        let now = now_ms();
        let projection = lock_read(&self.projection);

        for request in projection.active_elicitations.values() {
            if request.expires_at_ms <= now {
                continue;
            }
            let remaining_secs = (request.expires_at_ms - now).div_ceil(1000);
            let _ = self
                .nonce_store
                .store_nonce(&request.nonce, &request.id, remaining_secs);
        }
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let mut handles = Vec::new();

        handles.push(self.spawn_sweep(self.config.expiry_sweep_interval, |manager| async move {
            manager.sweep_expired().await;
        }));
        handles.push(
            self.spawn_sweep(self.config.snapshot_sweep_interval, |manager| async move {
                manager.sweep_snapshot();
            }),
        );
        handles.push(
            self.spawn_sweep(self.config.metrics_sweep_interval, |manager| async move {
                manager.sweep_metrics();
            }),
        );
        handles.push(
            self.spawn_sweep(self.config.nonce_cleanup_interval, |manager| async move {
                let removed = manager.nonce_store.cleanup_expired();
                if removed > 0 {
                    debug!(removed, "Nonce cleanup sweep");
                }
            }),
        );

        if let Some(batching) = &self.config.batching {
            handles.push(self.spawn_sweep(batching.window, |manager| async move {
                manager.flush_batch().await;
            }));
        }

        if let Some(mut receiver) = lock(&self.audit_receiver).take() {
            let manager = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        entry = receiver.recv() => {
                            match entry {
                                Some(entry) => manager.persist_security_entry(entry).await,
                                None => break,
                            }
                        }
                        _ = shutdown.changed() => {
                            // Drain whatever is queued before exiting.
                            while let Ok(entry) = receiver.try_recv() {
                                manager.persist_security_entry(entry).await;
                            }
                            break;
                        }
                    }
                }
            }));
        }

        lock(&self.tasks).extend(handles);
    }

    fn spawn_sweep<F, Fut>(self: &Arc<Self>, interval: Duration, work: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so sweeps run
            // after one full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => work(Arc::clone(&manager)).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Expire pending requests past their deadline.
    async fn sweep_expired(&self) {
        let now = now_ms();
        let expired: Vec<String> = {
            let projection = lock_read(&self.projection);
            projection
                .active_elicitations
                .values()
                .filter(|request| request.expires_at_ms < now)
                .map(|request| request.id.clone())
                .collect()
        };

        for elicitation_id in expired {
            let event = expired_event(&elicitation_id, now);
            match self.append_domain_event(event, None).await {
                Ok(()) => {
                    self.record_lifecycle(
                        "ELICITATION_EXPIRED",
                        "system",
                        &elicitation_id,
                        BTreeMap::new(),
                    )
                    .await;
                    info!(%elicitation_id, "Expired elicitation");
                }
                Err(err) => warn!(%err, %elicitation_id, "Expiry append failed"),
            }
        }
    }

    /// Snapshot the projection when enough events accumulated.
    fn sweep_snapshot(&self) {
        let snapshot = {
            let mut projection = match self.projection.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if projection.events_since_snapshot < self.config.snapshot_threshold {
                return;
            }
            projection.mark_snapshot();
            projection.clone()
        };

        if let Err(error) = self.snapshots.save(&snapshot, snapshot.last_sequence) {
            warn!(%error, "Projection snapshot failed");
        }
    }

    /// Trim the operation timing buffer to the retention window.
    fn sweep_metrics(&self) {
        let cutoff = now_ms().saturating_sub(self.config.timing_window.as_millis() as u64);
        let mut op_times = lock(&self.op_times);
        while op_times.front().is_some_and(|(at, _)| *at < cutoff) {
            op_times.pop_front();
        }
    }
}

/// Required-field presence check against a JSON-schema-shaped map.
///
/// Returns the first missing field, if any.
fn schema_missing_field(schema: &Value, data: &Value) -> Option<String> {
    let required = schema.get("required")?.as_list()?;
    for field in required {
        let Some(name) = field.as_str() else { continue };
        if data.get(name).is_none() {
            return Some(name.to_string());
        }
    }
    None
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted.get(index).copied().unwrap_or(0.0)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_read<T>(rwlock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
