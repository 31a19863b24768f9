//! Session table, validation rules, and hijack bookkeeping.

use serde::Serialize;
use shared_crypto::{mint_session_token, random_hex, sha256_hex, verify_session_token};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Session states for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
    Suspicious,
    Hijacked,
}

/// An active agent session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub agent_id: String,
    pub session_token: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub ip_address: String,
    pub user_agent: String,
    pub command_count: u64,
    pub state: SessionState,
    pub security_flags: Vec<String>,
}

/// Errors surfaced by session validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionSecurityError {
    /// No session matches the presented token.
    #[error("Session token not found for agent {agent_id}")]
    TokenNotFound { agent_id: String },

    /// The token belongs to a different agent.
    #[error("Session hijacking attempt: token for {owner} used by {presenter}")]
    AgentMismatch { owner: String, presenter: String },

    /// The session passed its inactivity timeout.
    #[error("Session expired for agent {agent_id}")]
    Expired { agent_id: String },

    /// The session is flagged suspicious and rejected until cleared.
    #[error("Session {session_id} flagged suspicious: {flag}")]
    Suspicious { session_id: String, flag: String },

    /// The token HMAC failed verification.
    #[error("Session token failed verification")]
    InvalidToken,
}

/// Validator configuration.
#[derive(Debug, Clone)]
pub struct SessionSecurityConfig {
    /// Inactivity timeout in seconds.
    pub session_timeout_secs: u64,
    /// Concurrent sessions per agent.
    pub max_concurrent_sessions: usize,
    /// Sustained command rate (per minute) that flags abuse.
    pub max_commands_per_minute: f64,
    /// Absolute session lifetime in seconds.
    pub max_session_lifetime_secs: u64,
    /// Replay detection window for inbound messages, in seconds.
    pub replay_window_secs: u64,
}

impl Default for SessionSecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 3600,
            max_concurrent_sessions: 3,
            max_commands_per_minute: 100.0,
            max_session_lifetime_secs: 8 * 3600,
            replay_window_secs: 300,
        }
    }
}

/// Security report over the session table.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSecurityReport {
    pub active_sessions: usize,
    pub suspicious_activities: usize,
    pub hijacking_attempts: usize,
    pub session_timeout_secs: u64,
    pub max_concurrent_sessions: usize,
    pub session_states: BTreeMap<String, usize>,
    /// Most recent suspicious activities, oldest first.
    pub recent_suspicious: Vec<String>,
}

#[derive(Debug, Clone)]
struct SuspiciousActivity {
    kind: String,
    agent_id: String,
    detail: String,
    timestamp: u64,
}

struct ValidatorInner {
    /// session_id -> session
    sessions: HashMap<String, SessionInfo>,
    /// agent_id -> session ids, oldest first
    agent_sessions: HashMap<String, Vec<String>>,
    suspicious_activities: Vec<SuspiciousActivity>,
    hijacking_attempts: u64,
    /// (agent_id, message hash) -> last seen, for replay detection
    message_hashes: VecDeque<(String, String, u64)>,
}

/// Comprehensive session security validation.
pub struct SessionSecurityValidator {
    secret: Vec<u8>,
    config: SessionSecurityConfig,
    inner: Mutex<ValidatorInner>,
}

impl SessionSecurityValidator {
    /// Create a validator keyed by the bridge secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>, config: SessionSecurityConfig) -> Self {
        Self {
            secret: secret.into(),
            config,
            inner: Mutex::new(ValidatorInner {
                sessions: HashMap::new(),
                agent_sessions: HashMap::new(),
                suspicious_activities: Vec::new(),
                hijacking_attempts: 0,
                message_hashes: VecDeque::new(),
            }),
        }
    }

    /// Create a new session for an agent, evicting the oldest one past the
    /// concurrency cap.
    pub fn create_session(
        &self,
        agent_id: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> SessionInfo {
        let now = unix_now();
        let session_id = random_hex(16);
        let session_token = mint_session_token(&self.secret, &session_id, agent_id, now);

        let session = SessionInfo {
            session_id: session_id.clone(),
            agent_id: agent_id.to_string(),
            session_token,
            created_at: now,
            last_activity: now,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            command_count: 0,
            state: SessionState::Active,
            security_flags: Vec::new(),
        };

        let evict = {
            let mut inner = self.lock();
            let ids = inner.agent_sessions.entry(agent_id.to_string()).or_default();
            let evict = if ids.len() >= self.config.max_concurrent_sessions {
                ids.first().cloned()
            } else {
                None
            };

            ids.push(session_id.clone());
            inner.sessions.insert(session_id.clone(), session.clone());
            evict
        };

        if let Some(oldest) = evict {
            self.revoke_session(&oldest, "concurrent_limit_exceeded");
        }

        info!(agent_id, %session_id, "Session created");
        session
    }

    /// Validate a session token and detect hijacking.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` when the HMAC fails.
    /// - `TokenNotFound` when no live session matches.
    /// - `AgentMismatch` when the token belongs to another agent.
    /// - `Expired` past the inactivity timeout.
    /// - `Suspicious` when IP/UA changed or abuse is detected.
    pub fn validate_session(
        &self,
        session_token: &str,
        agent_id: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<(), SessionSecurityError> {
        // Cryptographic check first; a forged token never touches the table.
        let parts = verify_session_token(&self.secret, session_token, agent_id).map_err(|e| {
            match e {
                shared_crypto::CryptoError::AgentMismatch { expected, actual } => {
                    self.record_hijack(&expected, &actual);
                    SessionSecurityError::AgentMismatch {
                        owner: expected,
                        presenter: actual,
                    }
                }
                _ => SessionSecurityError::InvalidToken,
            }
        })?;

        let now = unix_now();
        let expired_session;
        {
            let mut inner = self.lock();
            let Some(session) = inner.sessions.get_mut(&parts.session_id) else {
                warn!(agent_id, "Session validation failed: token not found");
                return Err(SessionSecurityError::TokenNotFound {
                    agent_id: agent_id.to_string(),
                });
            };

            if session.agent_id != agent_id {
                let owner = session.agent_id.clone();
                drop(inner);
                self.record_hijack(&owner, agent_id);
                return Err(SessionSecurityError::AgentMismatch {
                    owner,
                    presenter: agent_id.to_string(),
                });
            }

            if session.state == SessionState::Suspicious {
                return Err(SessionSecurityError::Suspicious {
                    session_id: session.session_id.clone(),
                    flag: session
                        .security_flags
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "suspicious".to_string()),
                });
            }

            if now.saturating_sub(session.last_activity) > self.config.session_timeout_secs {
                expired_session = Some(session.session_id.clone());
            } else {
                // IP / user-agent drift marks the session suspicious.
                if let Some(flag) = Self::detect_drift(session, ip_address, user_agent) {
                    session.state = SessionState::Suspicious;
                    session.security_flags.push(flag.clone());
                    let activity = SuspiciousActivity {
                        kind: flag.clone(),
                        agent_id: agent_id.to_string(),
                        detail: format!("session {}", session.session_id),
                        timestamp: now,
                    };
                    let session_id = session.session_id.clone();
                    inner.suspicious_activities.push(activity);
                    warn!(agent_id, %session_id, %flag, "Suspicious session activity");
                    return Err(SessionSecurityError::Suspicious { session_id, flag });
                }

                session.last_activity = now;
                session.command_count += 1;

                if let Some(flag) = Self::detect_abuse(session, &self.config, now) {
                    session.state = SessionState::Suspicious;
                    session.security_flags.push(flag.clone());
                    let session_id = session.session_id.clone();
                    warn!(agent_id, %session_id, %flag, "Session abuse detected");
                    return Err(SessionSecurityError::Suspicious { session_id, flag });
                }

                return Ok(());
            }
        }

        if let Some(session_id) = expired_session {
            self.revoke_session(&session_id, "expired");
        }
        Err(SessionSecurityError::Expired {
            agent_id: agent_id.to_string(),
        })
    }

    /// Validate a WebSocket URL against hijacking: the URL must be the
    /// agent's own endpoint.
    #[must_use]
    pub fn validate_websocket_url(&self, websocket_url: &str, agent_id: &str) -> bool {
        let expected = format!("ws://localhost:8765/agent/{agent_id}");
        if websocket_url == expected {
            return true;
        }
        self.record_hijack(agent_id, websocket_url);
        warn!(agent_id, websocket_url, "WebSocket hijacking attempt");
        false
    }

    /// Validate an inbound message against interception and replay.
    ///
    /// The message must claim the expected sender, and its hash must not
    /// have been seen for this agent within the replay window.
    #[must_use]
    pub fn validate_message(&self, message: &serde_json::Value, agent_id: &str) -> bool {
        let claimed_from = message.get("from").and_then(|v| v.as_str());
        if claimed_from != Some(agent_id) {
            self.record_hijack(agent_id, claimed_from.unwrap_or("<missing>"));
            warn!(agent_id, ?claimed_from, "Message interception attempt");
            return false;
        }

        let hash = sha256_hex(message.to_string().as_bytes());
        let now = unix_now();
        let cutoff = now.saturating_sub(self.config.replay_window_secs);

        let mut inner = self.lock();
        while inner
            .message_hashes
            .front()
            .is_some_and(|(_, _, ts)| *ts < cutoff)
        {
            inner.message_hashes.pop_front();
        }

        let replayed = inner
            .message_hashes
            .iter()
            .any(|(agent, seen_hash, _)| agent == agent_id && seen_hash == &hash);
        if replayed {
            warn!(agent_id, "Message replay detected");
            return false;
        }

        inner
            .message_hashes
            .push_back((agent_id.to_string(), hash, now));
        true
    }

    /// Revoke a session.
    pub fn revoke_session(&self, session_id: &str, reason: &str) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.remove(session_id) {
            if let Some(ids) = inner.agent_sessions.get_mut(&session.agent_id) {
                ids.retain(|id| id != session_id);
                if ids.is_empty() {
                    inner.agent_sessions.remove(&session.agent_id);
                }
            }
            info!(session_id, reason, "Session revoked");
        }
    }

    /// Revoke all sessions past the inactivity timeout; returns the count.
    pub fn cleanup_expired(&self) -> usize {
        let now = unix_now();
        let expired: Vec<String> = {
            let inner = self.lock();
            inner
                .sessions
                .values()
                .filter(|s| now.saturating_sub(s.last_activity) > self.config.session_timeout_secs)
                .map(|s| s.session_id.clone())
                .collect()
        };

        for session_id in &expired {
            self.revoke_session(session_id, "expired");
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Cleaned up expired sessions");
        }
        expired.len()
    }

    /// Security report over the current table.
    #[must_use]
    pub fn security_report(&self) -> SessionSecurityReport {
        let inner = self.lock();
        let mut states: BTreeMap<String, usize> = BTreeMap::new();
        for session in inner.sessions.values() {
            let key = match session.state {
                SessionState::Active => "active",
                SessionState::Expired => "expired",
                SessionState::Revoked => "revoked",
                SessionState::Suspicious => "suspicious",
                SessionState::Hijacked => "hijacked",
            };
            *states.entry(key.to_string()).or_insert(0) += 1;
        }

        let recent_suspicious = inner
            .suspicious_activities
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|activity| {
                format!(
                    "{} agent={} detail={} at={}",
                    activity.kind, activity.agent_id, activity.detail, activity.timestamp
                )
            })
            .collect();

        SessionSecurityReport {
            active_sessions: inner.sessions.len(),
            suspicious_activities: inner.suspicious_activities.len(),
            hijacking_attempts: inner.hijacking_attempts as usize,
            session_timeout_secs: self.config.session_timeout_secs,
            max_concurrent_sessions: self.config.max_concurrent_sessions,
            session_states: states,
            recent_suspicious,
        }
    }

    fn detect_drift(session: &SessionInfo, ip_address: &str, user_agent: &str) -> Option<String> {
        if !session.ip_address.is_empty() && !ip_address.is_empty() && session.ip_address != ip_address
        {
            return Some("ip_change".to_string());
        }
        if !session.user_agent.is_empty()
            && !user_agent.is_empty()
            && session.user_agent != user_agent
        {
            return Some("user_agent_change".to_string());
        }
        None
    }

    fn detect_abuse(
        session: &SessionInfo,
        config: &SessionSecurityConfig,
        now: u64,
    ) -> Option<String> {
        let lifetime = now.saturating_sub(session.created_at);

        // Sustained command rate, only meaningful after the first minute.
        if lifetime > 60 {
            let per_minute = session.command_count as f64 / (lifetime as f64 / 60.0);
            if per_minute > config.max_commands_per_minute {
                return Some("command_rate".to_string());
            }
        }
        if lifetime > config.max_session_lifetime_secs {
            return Some("session_lifetime".to_string());
        }
        None
    }

    fn record_hijack(&self, owner: &str, presenter: &str) {
        let mut inner = self.lock();
        inner.hijacking_attempts += 1;
        inner.suspicious_activities.push(SuspiciousActivity {
            kind: "hijack_attempt".to_string(),
            agent_id: owner.to_string(),
            detail: presenter.to_string(),
            timestamp: unix_now(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ValidatorInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SessionSecurityValidator {
        SessionSecurityValidator::new(b"session-test-secret".to_vec(), SessionSecurityConfig::default())
    }

    #[test]
    fn test_create_and_validate() {
        let validator = validator();
        let session = validator.create_session("agent_a", "10.0.0.1", "test-ua");

        assert!(validator
            .validate_session(&session.session_token, "agent_a", "10.0.0.1", "test-ua")
            .is_ok());
    }

    #[test]
    fn test_token_bound_to_agent() {
        let validator = validator();
        let session = validator.create_session("agent_a", "", "");

        let result = validator.validate_session(&session.session_token, "agent_b", "", "");
        assert!(matches!(
            result,
            Err(SessionSecurityError::AgentMismatch { .. })
        ));
        assert_eq!(validator.security_report().hijacking_attempts, 1);
    }

    #[test]
    fn test_forged_token_rejected() {
        let validator = validator();
        let session = validator.create_session("agent_a", "", "");

        // Tamper with the signed portion of the token.
        let forged = session.session_token.replace("agent_a", "agent_a2");
        let result = validator.validate_session(&forged, "agent_a2", "", "");
        assert!(result.is_err());
    }

    #[test]
    fn test_ip_change_marks_suspicious() {
        let validator = validator();
        let session = validator.create_session("agent_a", "10.0.0.1", "test-ua");

        let result =
            validator.validate_session(&session.session_token, "agent_a", "10.9.9.9", "test-ua");
        assert!(matches!(
            result,
            Err(SessionSecurityError::Suspicious { ref flag, .. }) if flag == "ip_change"
        ));

        // Suspicious sessions stay rejected.
        let again =
            validator.validate_session(&session.session_token, "agent_a", "10.0.0.1", "test-ua");
        assert!(matches!(again, Err(SessionSecurityError::Suspicious { .. })));
    }

    #[test]
    fn test_user_agent_change_marks_suspicious() {
        let validator = validator();
        let session = validator.create_session("agent_a", "10.0.0.1", "ua-one");

        let result =
            validator.validate_session(&session.session_token, "agent_a", "10.0.0.1", "ua-two");
        assert!(matches!(
            result,
            Err(SessionSecurityError::Suspicious { ref flag, .. }) if flag == "user_agent_change"
        ));
    }

    #[test]
    fn test_concurrent_session_cap_evicts_oldest() {
        let validator = validator();
        let first = validator.create_session("agent_a", "", "");
        let _second = validator.create_session("agent_a", "", "");
        let _third = validator.create_session("agent_a", "", "");
        let _fourth = validator.create_session("agent_a", "", "");

        // The first session was evicted.
        let result = validator.validate_session(&first.session_token, "agent_a", "", "");
        assert!(matches!(
            result,
            Err(SessionSecurityError::TokenNotFound { .. })
        ));
        assert_eq!(validator.security_report().active_sessions, 3);
    }

    #[test]
    fn test_cleanup_expired() {
        let config = SessionSecurityConfig {
            session_timeout_secs: 0,
            ..SessionSecurityConfig::default()
        };
        let validator = SessionSecurityValidator::new(b"secret".to_vec(), config);
        let _session = validator.create_session("agent_a", "", "");

        // With a zero timeout everything is expired once a second passes.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(validator.cleanup_expired(), 1);
        assert_eq!(validator.security_report().active_sessions, 0);
    }

    #[test]
    fn test_websocket_url_check() {
        let validator = validator();
        assert!(validator.validate_websocket_url("ws://localhost:8765/agent/agent_a", "agent_a"));
        assert!(!validator.validate_websocket_url("ws://evil.example/agent/agent_a", "agent_a"));
    }

    #[test]
    fn test_message_from_mismatch_rejected() {
        let validator = validator();
        let message = json!({"from": "agent_b", "body": "hello"});
        assert!(!validator.validate_message(&message, "agent_a"));
    }

    #[test]
    fn test_message_replay_rejected() {
        let validator = validator();
        let message = json!({"from": "agent_a", "body": "hello", "seq": 1});

        assert!(validator.validate_message(&message, "agent_a"));
        assert!(!validator.validate_message(&message, "agent_a"));

        // A different message still passes.
        let other = json!({"from": "agent_a", "body": "hello", "seq": 2});
        assert!(validator.validate_message(&other, "agent_a"));
    }

    #[test]
    fn test_revoke_session() {
        let validator = validator();
        let session = validator.create_session("agent_a", "", "");
        validator.revoke_session(&session.session_id, "manual");

        let result = validator.validate_session(&session.session_token, "agent_a", "", "");
        assert!(matches!(
            result,
            Err(SessionSecurityError::TokenNotFound { .. })
        ));
    }
}
