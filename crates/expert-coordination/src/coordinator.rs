//! # Secure Expert Coordinator
//!
//! Registration, delegation, and collaboration sessions over the event
//! store. All state changes leave an audit trail as coordination events.

use crate::errors::CoordinationError;
use crate::registry::{ExpertCapability, ExpertRegistry, ExpertStatus, RegisteredExpert};
use event_store::{AgentIdentity, EventStore, Permission};
use shared_crypto::{auth_challenge, constant_time_eq, random_hex, unix_now};
use shared_types::event::now_ms;
use shared_types::{Event, EventType, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Aggregate family for coordination events.
pub const AGGREGATE_EXPERT_COORDINATION: &str = "expert_coordination";
/// Component stamped into emitted events.
pub const SOURCE_COMPONENT: &str = "expert_coordinator";

/// Shell fragments never allowed in delegated command text.
const DENIED_COMMAND_FRAGMENTS: &[&str] = &["rm ", "sudo", "chmod 777", "dd ", "mkfs", "fdisk"];
/// Path prefixes requiring elevated permissions.
const SENSITIVE_PATH_PREFIXES: &[&str] =
    &["/etc", "/usr", "/var", "/boot", "/sys", "/proc", "/dev"];

/// A pending command delegation.
#[derive(Debug, Clone)]
pub struct Delegation {
    pub delegation_id: String,
    pub requester_id: String,
    pub expert_id: String,
    pub command_type: String,
    pub command_data: Value,
    pub required_capabilities: Vec<String>,
    pub created_at_ms: u64,
    pub timeout_at_ms: u64,
    pub status: String,
}

/// A multi-agent collaboration session.
///
/// Membership is resolved via this participants set and each expert's
/// `collaboration_sessions` index.
#[derive(Debug, Clone)]
pub struct CollaborationSession {
    pub session_id: String,
    pub coordinator_id: String,
    pub participants: BTreeSet<String>,

    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub status: String,

    pub shared_context: BTreeMap<String, Value>,
    /// Opaque channel identifiers fulfilled by the transport layer.
    pub communication_channels: BTreeMap<String, String>,

    pub delegated_commands: Vec<String>,
    pub completed_commands: Vec<String>,
    pub failed_commands: Vec<String>,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub total_experts: usize,
    pub available_experts: usize,
    pub active_sessions: usize,
    pub pending_delegations: usize,
    pub commands_delegated: u64,
    pub commands_completed: u64,
    pub authentication_failures: u64,
    pub average_response_time_ms: f64,
    /// Busy experts over registered experts, 0.0 to 1.0.
    pub system_load: f64,
}

/// Coordinator timing configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Registration attempts per agent per minute.
    pub registration_rate_per_minute: usize,
    /// Default delegation timeout.
    pub default_delegation_timeout_secs: u64,
    /// Heartbeat monitor cadence.
    pub heartbeat_interval: Duration,
    /// Heartbeat age past which an expert is disconnected.
    pub stale_heartbeat: Duration,
    /// Session cleanup cadence.
    pub session_cleanup_interval: Duration,
    /// Session inactivity past which it is ended.
    pub session_inactivity: Duration,
    /// Stats refresh cadence.
    pub stats_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            registration_rate_per_minute: 60,
            default_delegation_timeout_secs: 300,
            heartbeat_interval: Duration::from_secs(60),
            stale_heartbeat: Duration::from_secs(10 * 60),
            session_cleanup_interval: Duration::from_secs(3600),
            session_inactivity: Duration::from_secs(24 * 3600),
            stats_interval: Duration::from_secs(30),
        }
    }
}

/// Secure expert coordination system.
pub struct ExpertCoordinator {
    store: Arc<EventStore>,
    secret: Vec<u8>,
    config: CoordinatorConfig,

    registry: RwLock<ExpertRegistry>,
    sessions: RwLock<HashMap<String, CollaborationSession>>,
    delegations: RwLock<HashMap<String, Delegation>>,

    /// Registration timestamps per agent (Unix seconds).
    registration_window: Mutex<HashMap<String, VecDeque<u64>>>,
    stats: Mutex<CoordinatorStats>,

    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExpertCoordinator {
    /// Create a coordinator over the event store.
    #[must_use]
    pub fn new(
        store: Arc<EventStore>,
        secret: impl Into<Vec<u8>>,
        config: CoordinatorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            secret: secret.into(),
            config,
            registry: RwLock::new(ExpertRegistry::new()),
            sessions: RwLock::new(HashMap::new()),
            delegations: RwLock::new(HashMap::new()),
            registration_window: Mutex::new(HashMap::new()),
            stats: Mutex::new(CoordinatorStats::default()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the background monitors.
    pub fn start(self: &Arc<Self>) {
        let mut handles = lock(&self.tasks);
        handles.push(self.spawn_loop(self.config.heartbeat_interval, |coordinator| async move {
            coordinator.monitor_heartbeats().await;
        }));
        handles.push(
            self.spawn_loop(self.config.session_cleanup_interval, |coordinator| async move {
                coordinator.cleanup_sessions().await;
            }),
        );
        handles.push(self.spawn_loop(self.config.stats_interval, |coordinator| async move {
            coordinator.refresh_stats();
        }));
        info!("Expert coordination system started");
    }

    /// End all sessions, stop the monitors, and wait for them.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let session_ids: Vec<String> = lock_read(&self.sessions).keys().cloned().collect();
        for session_id in session_ids {
            self.end_collaboration_session(&session_id, "system_shutdown")
                .await;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            let _ = handle.await;
        }
        info!("Expert coordination system stopped");
    }

    /// Register an expert agent.
    ///
    /// Returns the minted auth token.
    ///
    /// # Errors
    ///
    /// - `MissingPermission` without `expert:coordination` and
    ///   `command:execution`.
    /// - `InvalidChallenge` when the HMAC challenge does not verify for
    ///   the current minute.
    /// - `RateLimited` past 60 registrations per minute per agent.
    pub async fn register_expert(
        &self,
        identity: AgentIdentity,
        capabilities: Vec<ExpertCapability>,
        challenge: &str,
    ) -> Result<String, CoordinationError> {
        let agent_id = identity.agent_id.clone();

        for permission in [Permission::ExpertCoordination, Permission::CommandExecution] {
            if !identity.has_permission(permission) {
                self.log_auth_failure(&agent_id, "insufficient_permissions")
                    .await;
                return Err(CoordinationError::MissingPermission {
                    agent_id,
                    permission,
                });
            }
        }

        let expected = auth_challenge(&self.secret, &agent_id, unix_now() / 60);
        if !constant_time_eq(expected.as_bytes(), challenge.as_bytes()) {
            self.log_auth_failure(&agent_id, "invalid_challenge").await;
            return Err(CoordinationError::InvalidChallenge { agent_id });
        }

        if self.registration_rate_limited(&agent_id) {
            self.log_auth_failure(&agent_id, "rate_limited").await;
            return Err(CoordinationError::RateLimited { agent_id });
        }

        let auth_token = random_hex(32);
        let session_key = random_hex(16);
        let capability_names: Vec<String> =
            capabilities.iter().map(|cap| cap.name.clone()).collect();

        let expert = RegisteredExpert {
            agent_id: agent_id.clone(),
            identity,
            capabilities,
            status: ExpertStatus::Available,
            auth_token: auth_token.clone(),
            session_key,
            last_heartbeat_ms: now_ms(),
            commands_completed: 0,
            average_response_time_ms: 0.0,
            success_rate: 1.0,
            current_contexts: BTreeSet::new(),
            collaboration_sessions: BTreeSet::new(),
        };

        lock_write(&self.registry).insert(expert);
        lock(&self.stats).total_experts += 1;

        let mut data = BTreeMap::new();
        data.insert(
            "capabilities".to_string(),
            Value::List(capability_names.iter().map(|n| Value::from(n.as_str())).collect()),
        );
        self.log_event(EventType::AgentRegistered, &agent_id, "expert_registered", data)
            .await;

        info!(
            %agent_id,
            capabilities = capability_names.len(),
            "Expert registered"
        );
        Ok(auth_token)
    }

    /// Authenticate an expert by session token, refreshing its heartbeat.
    #[must_use]
    pub fn authenticate_expert(&self, auth_token: &str) -> Option<RegisteredExpert> {
        let mut registry = lock_write(&self.registry);
        let agent_id = registry.agent_for_token(auth_token)?.to_string();

        let expert = registry.get_mut(&agent_id)?;
        if !expert.is_authenticated() {
            return None;
        }
        expert.last_heartbeat_ms = now_ms();
        Some(expert.clone())
    }

    /// Delegate a command to the best capable expert.
    ///
    /// Returns the delegation id.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` for an unknown requester token.
    /// - `CommandRejected` by the command security rules.
    /// - `NoCapableExpert` when nobody covers the required capabilities.
    pub async fn delegate_command(
        &self,
        requester_token: &str,
        command_type: &str,
        command_data: Value,
        required_capabilities: Vec<String>,
        timeout_secs: Option<u64>,
    ) -> Result<String, CoordinationError> {
        let Some(requester) = self.authenticate_expert(requester_token) else {
            self.log_auth_failure("unknown", "delegation_auth_failed")
                .await;
            return Err(CoordinationError::AuthenticationFailed);
        };

        validate_command_security(command_type, &command_data, &requester)?;

        let now = now_ms();
        let selected_id = {
            let registry = lock_read(&self.registry);
            let candidates = registry.find_capable(&required_capabilities, now);
            if candidates.is_empty() {
                None
            } else {
                Some(select_best_expert(&candidates).agent_id.clone())
            }
        };
        let Some(expert_id) = selected_id else {
            return Err(CoordinationError::NoCapableExpert {
                required: required_capabilities,
            });
        };

        let timeout = timeout_secs.unwrap_or(self.config.default_delegation_timeout_secs);
        let delegation_id = Uuid::new_v4().to_string();
        let delegation = Delegation {
            delegation_id: delegation_id.clone(),
            requester_id: requester.agent_id.clone(),
            expert_id: expert_id.clone(),
            command_type: command_type.to_string(),
            command_data,
            required_capabilities: required_capabilities.clone(),
            created_at_ms: now,
            timeout_at_ms: now + timeout * 1000,
            status: "pending".to_string(),
        };

        {
            let mut registry = lock_write(&self.registry);
            if let Some(expert) = registry.get_mut(&expert_id) {
                expert.status = ExpertStatus::Busy;
            }
        }
        lock_write(&self.delegations).insert(delegation_id.clone(), delegation);
        lock(&self.stats).commands_delegated += 1;

        let mut data = BTreeMap::new();
        data.insert(
            "requester_id".to_string(),
            Value::from(requester.agent_id.as_str()),
        );
        data.insert("expert_id".to_string(), Value::from(expert_id.as_str()));
        data.insert("command_type".to_string(), Value::from(command_type));
        self.log_event(EventType::Custom, &delegation_id, "command_delegated", data)
            .await;

        info!(
            command_type,
            %expert_id, %delegation_id, "Command delegated"
        );
        Ok(delegation_id)
    }

    /// Mark a delegation complete and release its expert.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown delegation id.
    pub async fn complete_delegation(
        &self,
        delegation_id: &str,
        success: bool,
        response_time_ms: f64,
    ) -> Result<(), CoordinationError> {
        let delegation = lock_write(&self.delegations)
            .remove(delegation_id)
            .ok_or_else(|| CoordinationError::SessionNotFound {
                session_id: delegation_id.to_string(),
            })?;

        {
            let mut registry = lock_write(&self.registry);
            if let Some(expert) = registry.get_mut(&delegation.expert_id) {
                expert.commands_completed += 1;
                let n = expert.commands_completed as f64;
                expert.average_response_time_ms =
                    (expert.average_response_time_ms * (n - 1.0) + response_time_ms) / n;
                expert.success_rate =
                    (expert.success_rate * (n - 1.0) + if success { 1.0 } else { 0.0 }) / n;
                if expert.collaboration_sessions.is_empty() {
                    expert.status = ExpertStatus::Available;
                }
            }
        }
        lock(&self.stats).commands_completed += 1;

        let mut data = BTreeMap::new();
        data.insert("expert_id".to_string(), Value::from(delegation.expert_id.as_str()));
        data.insert("success".to_string(), Value::from(success));
        self.log_event(EventType::Custom, delegation_id, "command_completed", data)
            .await;
        Ok(())
    }

    /// Start a collaboration session across registered, available experts.
    ///
    /// Returns the session id.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` for an unknown coordinator token.
    /// - `ParticipantNotRegistered` / `ParticipantUnavailable` when a
    ///   participant cannot join.
    pub async fn start_collaboration_session(
        &self,
        coordinator_token: &str,
        participant_ids: &[String],
        shared_context: BTreeMap<String, Value>,
    ) -> Result<String, CoordinationError> {
        let Some(coordinator) = self.authenticate_expert(coordinator_token) else {
            return Err(CoordinationError::AuthenticationFailed);
        };

        let now = now_ms();
        {
            let registry = lock_read(&self.registry);
            for participant_id in participant_ids {
                let Some(participant) = registry.get(participant_id) else {
                    return Err(CoordinationError::ParticipantNotRegistered {
                        agent_id: participant_id.clone(),
                    });
                };
                if !participant.is_available(now) {
                    return Err(CoordinationError::ParticipantUnavailable {
                        agent_id: participant_id.clone(),
                    });
                }
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let participants: BTreeSet<String> = participant_ids.iter().cloned().collect();

        let mut communication_channels = BTreeMap::new();
        for participant_id in &participants {
            communication_channels.insert(
                participant_id.clone(),
                format!("sessions/{session_id}/{participant_id}.channel"),
            );
        }

        let session = CollaborationSession {
            session_id: session_id.clone(),
            coordinator_id: coordinator.agent_id.clone(),
            participants: participants.clone(),
            created_at_ms: now,
            last_activity_ms: now,
            status: "active".to_string(),
            shared_context,
            communication_channels,
            delegated_commands: Vec::new(),
            completed_commands: Vec::new(),
            failed_commands: Vec::new(),
        };

        {
            let mut registry = lock_write(&self.registry);
            for participant_id in &participants {
                if let Some(expert) = registry.get_mut(participant_id) {
                    expert.collaboration_sessions.insert(session_id.clone());
                    expert.status = ExpertStatus::Busy;
                }
            }
        }
        lock_write(&self.sessions).insert(session_id.clone(), session);
        lock(&self.stats).active_sessions += 1;

        let mut data = BTreeMap::new();
        data.insert(
            "coordinator_id".to_string(),
            Value::from(coordinator.agent_id.as_str()),
        );
        data.insert(
            "participants".to_string(),
            Value::List(
                participants
                    .iter()
                    .map(|id| Value::from(id.as_str()))
                    .collect(),
            ),
        );
        self.log_event(EventType::Custom, &session_id, "collaboration_started", data)
            .await;

        info!(
            %session_id,
            participants = participants.len(),
            "Collaboration session started"
        );
        Ok(session_id)
    }

    /// End a collaboration session, releasing participants whose only
    /// active session it was.
    pub async fn end_collaboration_session(&self, session_id: &str, reason: &str) {
        let Some(session) = lock_write(&self.sessions).remove(session_id) else {
            return;
        };

        {
            let mut registry = lock_write(&self.registry);
            for participant_id in &session.participants {
                if let Some(expert) = registry.get_mut(participant_id) {
                    expert.collaboration_sessions.remove(session_id);
                    if expert.collaboration_sessions.is_empty() {
                        expert.status = ExpertStatus::Available;
                    }
                }
            }
        }

        {
            let mut stats = lock(&self.stats);
            stats.active_sessions = stats.active_sessions.saturating_sub(1);
        }

        let mut data = BTreeMap::new();
        data.insert("reason".to_string(), Value::from(reason));
        data.insert(
            "duration_ms".to_string(),
            Value::from(now_ms().saturating_sub(session.created_at_ms)),
        );
        self.log_event(EventType::Custom, session_id, "collaboration_ended", data)
            .await;

        info!(session_id, reason, "Collaboration session ended");
    }

    /// Current coordination statistics.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        lock(&self.stats).clone()
    }

    /// Active session by id.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<CollaborationSession> {
        lock_read(&self.sessions).get(session_id).cloned()
    }

    /// Pending delegation by id.
    #[must_use]
    pub fn delegation(&self, delegation_id: &str) -> Option<Delegation> {
        lock_read(&self.delegations).get(delegation_id).cloned()
    }

    /// Mint the expected registration challenge for an agent at the
    /// current minute (setup and tests).
    #[must_use]
    pub fn registration_challenge(&self, agent_id: &str) -> String {
        auth_challenge(&self.secret, agent_id, unix_now() / 60)
    }

    // ----- background monitors -----

    /// Disconnect experts whose heartbeat went stale and end their
    /// sessions.
    async fn monitor_heartbeats(&self) {
        let stale_before = now_ms().saturating_sub(self.config.stale_heartbeat.as_millis() as u64);

        let stale: Vec<(String, BTreeSet<String>)> = {
            let registry = lock_read(&self.registry);
            registry
                .iter()
                .filter(|expert| expert.last_heartbeat_ms < stale_before)
                .map(|expert| {
                    (
                        expert.agent_id.clone(),
                        expert.collaboration_sessions.clone(),
                    )
                })
                .collect()
        };

        for (agent_id, sessions) in stale {
            for session_id in sessions {
                self.end_collaboration_session(&session_id, "expert_disconnected")
                    .await;
            }
            lock_write(&self.registry).remove(&agent_id);

            let mut data = BTreeMap::new();
            data.insert("reason".to_string(), Value::from("heartbeat_timeout"));
            self.log_event(EventType::AgentDisconnected, &agent_id, "expert_disconnected", data)
                .await;
            info!(%agent_id, "Removed stale expert");
        }
    }

    /// End sessions inactive past the configured bound.
    async fn cleanup_sessions(&self) {
        let inactive_before =
            now_ms().saturating_sub(self.config.session_inactivity.as_millis() as u64);
        let expired: Vec<String> = {
            let sessions = lock_read(&self.sessions);
            sessions
                .values()
                .filter(|session| session.last_activity_ms < inactive_before)
                .map(|session| session.session_id.clone())
                .collect()
        };

        for session_id in expired {
            self.end_collaboration_session(&session_id, "session_expired")
                .await;
        }
    }

    /// Recompute derived statistics.
    fn refresh_stats(&self) {
        let now = now_ms();
        let (total, available, busy, avg_response) = {
            let registry = lock_read(&self.registry);
            let total = registry.len();
            let available = registry.iter().filter(|e| e.is_available(now)).count();
            let busy = registry
                .iter()
                .filter(|e| e.status == ExpertStatus::Busy)
                .count();
            let avg = if total > 0 {
                registry.iter().map(|e| e.average_response_time_ms).sum::<f64>() / total as f64
            } else {
                0.0
            };
            (total, available, busy, avg)
        };
        let pending = lock_read(&self.delegations).len();

        let mut stats = lock(&self.stats);
        stats.total_experts = total;
        stats.available_experts = available;
        stats.pending_delegations = pending;
        stats.average_response_time_ms = avg_response;
        stats.system_load = if total > 0 {
            busy as f64 / total as f64
        } else {
            0.0
        };
    }

    // ----- helpers -----

    fn registration_rate_limited(&self, agent_id: &str) -> bool {
        let now = unix_now();
        let cutoff = now.saturating_sub(60);

        let mut windows = lock(&self.registration_window);
        let window = windows.entry(agent_id.to_string()).or_default();
        while window.front().is_some_and(|&ts| ts <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.config.registration_rate_per_minute {
            return true;
        }
        window.push_back(now);
        false
    }

    async fn log_auth_failure(&self, agent_id: &str, reason: &str) {
        lock(&self.stats).authentication_failures += 1;
        warn!(agent_id, reason, "Coordination authentication failure");

        let mut data = BTreeMap::new();
        data.insert("auth_failure_reason".to_string(), Value::from(reason));
        self.log_event(EventType::AgentDisconnected, agent_id, "auth_failure", data)
            .await;
    }

    async fn log_event(
        &self,
        event_type: EventType,
        aggregate_id: &str,
        coordination_event_type: &str,
        data: BTreeMap<String, Value>,
    ) {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "coordination_event_type".to_string(),
            Value::from(coordination_event_type),
        );

        let event = Event::new(event_type, aggregate_id, AGGREGATE_EXPERT_COORDINATION)
            .with_data(data)
            .with_metadata(metadata)
            .with_source_component(SOURCE_COMPONENT);

        if let Err(error) = self.store.append(event, None).await {
            warn!(%error, coordination_event_type, "Coordination event append failed");
        }
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, interval: Duration, work: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let coordinator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => work(Arc::clone(&coordinator)).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Apply the command security rules.
fn validate_command_security(
    command_type: &str,
    command_data: &Value,
    requester: &RegisteredExpert,
) -> Result<(), CoordinationError> {
    if let Some(command_text) = command_data.get("command").and_then(Value::as_str) {
        let lowered = command_text.to_lowercase();
        for fragment in DENIED_COMMAND_FRAGMENTS {
            if lowered.contains(fragment) {
                return Err(CoordinationError::CommandRejected {
                    reason: format!("dangerous command fragment '{}'", fragment.trim()),
                });
            }
        }
    }

    if let Some(path) = command_data.get("path").and_then(Value::as_str) {
        for prefix in SENSITIVE_PATH_PREFIXES {
            if path.starts_with(prefix) {
                return Err(CoordinationError::CommandRejected {
                    reason: format!("access to {prefix} requires elevated permissions"),
                });
            }
        }
    }

    let required: &[Permission] = match command_type {
        "file_write" => &[Permission::FileWrite],
        "file_read" => &[Permission::FileRead],
        "command_execution" => &[Permission::CommandExecution],
        "system_admin" => &[Permission::SystemAdmin],
        _ => &[],
    };
    for permission in required {
        if !requester.identity.has_permission(*permission) {
            return Err(CoordinationError::CommandRejected {
                reason: format!("missing permission {permission}"),
            });
        }
    }

    debug!(command_type, "Command validated");
    Ok(())
}

/// Score candidates by performance and pick the best.
///
/// `find_capable` returns candidates sorted by agent id, so equal scores
/// resolve lexicographically and replay stays deterministic.
fn select_best_expert<'a>(candidates: &[&'a RegisteredExpert]) -> &'a RegisteredExpert {
    let score = |expert: &RegisteredExpert| -> f64 {
        expert.success_rate * 0.4
            + (1.0 / expert.average_response_time_ms.max(1.0)) * 0.3
            + (1.0 / (expert.current_contexts.len() as f64 + 1.0)) * 0.3
    };

    let mut best = candidates[0];
    let mut best_score = score(best);
    for candidate in &candidates[1..] {
        let candidate_score = score(candidate);
        if candidate_score > best_score {
            best = candidate;
            best_score = candidate_score;
        }
    }
    best
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

fn lock_write<T>(rwlock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
