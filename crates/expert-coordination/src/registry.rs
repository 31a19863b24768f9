//! Expert registry: capability records, status, and token lookup.

use event_store::{AgentIdentity, Permission};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Heartbeat freshness required for an expert to count as available, in
/// milliseconds (5 minutes).
pub const HEARTBEAT_FRESHNESS_MS: u64 = 5 * 60 * 1000;

/// Expert agent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertStatus {
    Available,
    Busy,
    Offline,
    Suspended,
}

/// Description of one expert capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertCapability {
    pub name: String,
    pub description: String,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    pub required_permissions: Vec<Permission>,
    pub estimated_latency_ms: f64,
    pub confidence_threshold: f64,
}

impl ExpertCapability {
    /// Capability with defaults for latency and confidence.
    #[must_use]
    pub fn named(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            required_permissions: Vec::new(),
            estimated_latency_ms: 1000.0,
            confidence_threshold: 0.8,
        }
    }
}

/// A registered expert agent with authentication and performance state.
#[derive(Debug, Clone)]
pub struct RegisteredExpert {
    pub agent_id: String,
    pub identity: AgentIdentity,
    pub capabilities: Vec<ExpertCapability>,
    pub status: ExpertStatus,

    pub auth_token: String,
    pub session_key: String,
    pub last_heartbeat_ms: u64,

    pub commands_completed: u64,
    pub average_response_time_ms: f64,
    pub success_rate: f64,

    pub current_contexts: BTreeSet<String>,
    pub collaboration_sessions: BTreeSet<String>,
}

impl RegisteredExpert {
    /// Whether the expert holds valid session credentials.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.auth_token.is_empty() && !self.session_key.is_empty()
    }

    /// Whether the expert can take new work at `now_ms`.
    #[must_use]
    pub fn is_available(&self, now_ms: u64) -> bool {
        self.status == ExpertStatus::Available
            && self.is_authenticated()
            && now_ms.saturating_sub(self.last_heartbeat_ms) < HEARTBEAT_FRESHNESS_MS
    }

    /// Whether this expert covers every required capability.
    #[must_use]
    pub fn covers(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|name| self.capabilities.iter().any(|cap| &cap.name == name))
    }
}

/// Registry of experts with a token index.
#[derive(Debug, Default)]
pub struct ExpertRegistry {
    experts: HashMap<String, RegisteredExpert>,
    /// auth_token -> agent_id
    tokens: HashMap<String, String>,
}

impl ExpertRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an expert, keeping the token index current.
    pub fn insert(&mut self, expert: RegisteredExpert) {
        if let Some(previous) = self.experts.get(&expert.agent_id) {
            self.tokens.remove(&previous.auth_token);
        }
        self.tokens
            .insert(expert.auth_token.clone(), expert.agent_id.clone());
        self.experts.insert(expert.agent_id.clone(), expert);
    }

    /// Remove an expert and its token.
    pub fn remove(&mut self, agent_id: &str) -> Option<RegisteredExpert> {
        let expert = self.experts.remove(agent_id)?;
        self.tokens.remove(&expert.auth_token);
        Some(expert)
    }

    /// Expert by agent id.
    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<&RegisteredExpert> {
        self.experts.get(agent_id)
    }

    /// Mutable expert by agent id.
    pub fn get_mut(&mut self, agent_id: &str) -> Option<&mut RegisteredExpert> {
        self.experts.get_mut(agent_id)
    }

    /// Resolve an auth token to its agent id.
    #[must_use]
    pub fn agent_for_token(&self, auth_token: &str) -> Option<&str> {
        self.tokens.get(auth_token).map(String::as_str)
    }

    /// Experts whose capability sets cover `required` and which are
    /// available at `now_ms`, sorted by agent id for determinism.
    #[must_use]
    pub fn find_capable(&self, required: &[String], now_ms: u64) -> Vec<&RegisteredExpert> {
        let mut capable: Vec<&RegisteredExpert> = self
            .experts
            .values()
            .filter(|expert| expert.is_available(now_ms) && expert.covers(required))
            .collect();
        capable.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        capable
    }

    /// All experts.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredExpert> {
        self.experts.values()
    }

    /// Mutable iteration over all experts.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredExpert> {
        self.experts.values_mut()
    }

    /// Number of registered experts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experts.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::AgentRole;
    use shared_types::event::now_ms;

    fn identity(agent_id: &str) -> AgentIdentity {
        AgentIdentity {
            agent_id: agent_id.to_string(),
            role: AgentRole::ExpertAgent,
            permissions: AgentRole::ExpertAgent.permissions(),
            allowed_aggregates: BTreeSet::new(),
            allowed_streams: BTreeSet::new(),
            max_requests_per_minute: 2000,
            max_batch_size: 500,
            authenticated_at: 0,
            expires_at: None,
        }
    }

    fn expert(agent_id: &str, capabilities: &[&str]) -> RegisteredExpert {
        RegisteredExpert {
            agent_id: agent_id.to_string(),
            identity: identity(agent_id),
            capabilities: capabilities
                .iter()
                .map(|name| ExpertCapability::named(*name, "test"))
                .collect(),
            status: ExpertStatus::Available,
            auth_token: format!("token-{agent_id}"),
            session_key: format!("key-{agent_id}"),
            last_heartbeat_ms: now_ms(),
            commands_completed: 0,
            average_response_time_ms: 100.0,
            success_rate: 1.0,
            current_contexts: BTreeSet::new(),
            collaboration_sessions: BTreeSet::new(),
        }
    }

    #[test]
    fn test_token_index() {
        let mut registry = ExpertRegistry::new();
        registry.insert(expert("expert_a", &["review"]));

        assert_eq!(registry.agent_for_token("token-expert_a"), Some("expert_a"));
        registry.remove("expert_a");
        assert!(registry.agent_for_token("token-expert_a").is_none());
    }

    #[test]
    fn test_capability_superset_matching() {
        let mut registry = ExpertRegistry::new();
        registry.insert(expert("expert_a", &["review", "security"]));
        registry.insert(expert("expert_b", &["review"]));

        let now = now_ms();
        let both = registry.find_capable(&["review".to_string()], now);
        assert_eq!(both.len(), 2);

        let security_only =
            registry.find_capable(&["review".to_string(), "security".to_string()], now);
        assert_eq!(security_only.len(), 1);
        assert_eq!(security_only[0].agent_id, "expert_a");
    }

    #[test]
    fn test_find_capable_sorted_for_determinism() {
        let mut registry = ExpertRegistry::new();
        registry.insert(expert("zulu", &["review"]));
        registry.insert(expert("alpha", &["review"]));
        registry.insert(expert("mike", &["review"]));

        let capable = registry.find_capable(&["review".to_string()], now_ms());
        let ids: Vec<&str> = capable.iter().map(|e| e.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mike", "zulu"]);
    }

    #[test]
    fn test_stale_heartbeat_excluded() {
        let mut registry = ExpertRegistry::new();
        let mut stale = expert("expert_a", &["review"]);
        stale.last_heartbeat_ms = 0;
        registry.insert(stale);

        assert!(registry
            .find_capable(&["review".to_string()], now_ms())
            .is_empty());
    }

    #[test]
    fn test_busy_excluded() {
        let mut registry = ExpertRegistry::new();
        let mut busy = expert("expert_a", &["review"]);
        busy.status = ExpertStatus::Busy;
        registry.insert(busy);

        assert!(registry
            .find_capable(&["review".to_string()], now_ms())
            .is_empty());
    }
}
