//! # Authentication and Authorization
//!
//! HMAC-token authentication, role-based permissions, and per-agent
//! request-rate enforcement for event store access.
//!
//! The shared authenticator is an explicit [`IdentityRegistry`] value that
//! every store and manager receives at construction (`new -> share ->
//! close`). There is no process-global lookup.

use serde::{Deserialize, Serialize};
use shared_crypto::{create_agent_token, verify_agent_token, CryptoError};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Event store and coordination permissions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadEvents,
    WriteEvents,
    QueryEvents,
    AdminAccess,
    HealthCheck,
    ExpertCoordination,
    CommandExecution,
    FileRead,
    FileWrite,
    SystemAdmin,
}

impl Permission {
    /// Stable string form, e.g. `events:write`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadEvents => "events:read",
            Self::WriteEvents => "events:write",
            Self::QueryEvents => "events:query",
            Self::AdminAccess => "admin:access",
            Self::HealthCheck => "health:check",
            Self::ExpertCoordination => "expert:coordination",
            Self::CommandExecution => "command:execution",
            Self::FileRead => "file:read",
            Self::FileWrite => "file:write",
            Self::SystemAdmin => "system:admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent roles with graduated permission levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Read-only access to public events.
    Guest,
    /// Standard agent permissions.
    Agent,
    /// Enhanced permissions for specialized agents.
    ExpertAgent,
    /// System-level agents.
    SystemAgent,
    /// Full administrative access.
    Admin,
}

impl AgentRole {
    /// Default permission set for this role.
    #[must_use]
    pub fn permissions(&self) -> BTreeSet<Permission> {
        use Permission::*;
        let perms: &[Permission] = match self {
            Self::Guest => &[ReadEvents, HealthCheck],
            Self::Agent => &[ReadEvents, WriteEvents, QueryEvents, HealthCheck],
            Self::ExpertAgent => &[
                ReadEvents,
                WriteEvents,
                QueryEvents,
                HealthCheck,
                ExpertCoordination,
                CommandExecution,
                FileRead,
            ],
            Self::SystemAgent => &[
                ReadEvents,
                WriteEvents,
                QueryEvents,
                HealthCheck,
                AdminAccess,
                ExpertCoordination,
                CommandExecution,
                FileRead,
                FileWrite,
            ],
            Self::Admin => &[
                ReadEvents,
                WriteEvents,
                QueryEvents,
                HealthCheck,
                AdminAccess,
                ExpertCoordination,
                CommandExecution,
                FileRead,
                FileWrite,
                SystemAdmin,
            ],
        };
        perms.iter().copied().collect()
    }

    /// Requests-per-minute budget for this role.
    #[must_use]
    pub fn max_requests_per_minute(&self) -> u32 {
        match self {
            Self::Guest => 100,
            Self::Agent => 1000,
            Self::ExpertAgent => 2000,
            Self::SystemAgent => 5000,
            Self::Admin => 10_000,
        }
    }

    /// Batch-size budget for this role.
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Guest => 10,
            Self::Agent => 100,
            Self::ExpertAgent => 500,
            Self::SystemAgent | Self::Admin => 1000,
        }
    }
}

/// Authentication lifetime for an identity, in seconds (24 hours).
const IDENTITY_TTL_SECS: u64 = 24 * 3600;

/// Authenticated agent identity with scopes and budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub role: AgentRole,
    pub permissions: BTreeSet<Permission>,

    /// Aggregates this agent may touch. Empty means unrestricted.
    pub allowed_aggregates: BTreeSet<String>,
    /// Streams this agent may read. Empty means unrestricted.
    pub allowed_streams: BTreeSet<String>,

    pub max_requests_per_minute: u32,
    pub max_batch_size: usize,

    /// Unix seconds of authentication.
    pub authenticated_at: u64,
    /// Unix seconds past which the identity is invalid.
    pub expires_at: Option<u64>,
}

impl AgentIdentity {
    /// Check a specific permission.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Check aggregate scope (empty scope is unrestricted).
    #[must_use]
    pub fn can_access_aggregate(&self, aggregate_id: &str) -> bool {
        self.allowed_aggregates.is_empty() || self.allowed_aggregates.contains(aggregate_id)
    }

    /// Check stream scope (empty scope is unrestricted).
    #[must_use]
    pub fn can_access_stream(&self, stream_id: &str) -> bool {
        self.allowed_streams.is_empty() || self.allowed_streams.contains(stream_id)
    }

    /// Whether the authentication has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expiry| now > expiry)
    }
}

/// Errors from authentication and authorization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The agent has not authenticated.
    #[error("Agent {agent_id} is not authenticated")]
    NotAuthenticated { agent_id: String },

    /// The authentication has expired.
    #[error("Agent {agent_id} authentication has expired")]
    IdentityExpired { agent_id: String },

    /// The token was rejected.
    #[error("Token rejected for agent {agent_id}: {source}")]
    InvalidToken {
        agent_id: String,
        #[source]
        source: CryptoError,
    },

    /// A required permission is missing.
    #[error("Agent {agent_id} lacks {permission} permission")]
    MissingPermission {
        agent_id: String,
        permission: Permission,
    },

    /// Batch exceeds the role budget.
    #[error("Batch size {size} exceeds limit {limit} for agent {agent_id}")]
    BatchTooLarge {
        agent_id: String,
        size: usize,
        limit: usize,
    },

    /// Aggregate outside the agent's scope.
    #[error("Agent {agent_id} cannot access aggregate {aggregate_id}")]
    AggregateDenied {
        agent_id: String,
        aggregate_id: String,
    },

    /// Per-minute request budget exhausted.
    #[error("Rate limit exceeded for agent {agent_id}: {count}/min")]
    RateLimited { agent_id: String, count: u32 },

    /// The identity registry has been closed.
    #[error("Identity registry is closed")]
    RegistryClosed,
}

struct RegistryInner {
    secret: Vec<u8>,
    agents: RwLock<HashMap<String, AgentIdentity>>,
    closed: AtomicBool,
}

/// Shared identity cache with explicit lifecycle (`new -> share -> close`).
///
/// Cloning shares the underlying cache. Every store and manager receives a
/// registry at construction; nothing resolves identities through globals.
#[derive(Clone)]
pub struct IdentityRegistry {
    inner: Arc<RegistryInner>,
}

impl IdentityRegistry {
    /// Create a registry keyed by the shared secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                secret: secret.into(),
                agents: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Authenticate an agent with an HMAC token and cache the identity.
    ///
    /// # Errors
    ///
    /// - `RegistryClosed` after `close()`.
    /// - `InvalidToken` when the token fails format, skew, or HMAC checks.
    pub fn authenticate(
        &self,
        agent_id: &str,
        token: &str,
        role: AgentRole,
    ) -> Result<AgentIdentity, AuthError> {
        if self.is_closed() {
            return Err(AuthError::RegistryClosed);
        }

        verify_agent_token(&self.inner.secret, agent_id, token).map_err(|source| {
            AuthError::InvalidToken {
                agent_id: agent_id.to_string(),
                source,
            }
        })?;

        let now = unix_now();
        let identity = AgentIdentity {
            agent_id: agent_id.to_string(),
            role,
            permissions: role.permissions(),
            allowed_aggregates: BTreeSet::new(),
            allowed_streams: BTreeSet::new(),
            max_requests_per_minute: role.max_requests_per_minute(),
            max_batch_size: role.max_batch_size(),
            authenticated_at: now,
            expires_at: Some(now + IDENTITY_TTL_SECS),
        };

        if let Ok(mut agents) = self.inner.agents.write() {
            agents.insert(agent_id.to_string(), identity.clone());
        }

        debug!(agent_id, role = ?role, "Agent authenticated");
        Ok(identity)
    }

    /// Mint a token for an agent (setup and tests).
    #[must_use]
    pub fn create_token(&self, agent_id: &str) -> String {
        create_agent_token(&self.inner.secret, agent_id)
    }

    /// Get a cached, unexpired identity.
    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<AgentIdentity> {
        let now = unix_now();

        let expired = {
            let agents = self.inner.agents.read().ok()?;
            match agents.get(agent_id) {
                Some(identity) if !identity.is_expired(now) => return Some(identity.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Ok(mut agents) = self.inner.agents.write() {
                agents.remove(agent_id);
            }
        }
        None
    }

    /// Revoke an agent's cached identity.
    pub fn revoke(&self, agent_id: &str) {
        if let Ok(mut agents) = self.inner.agents.write() {
            agents.remove(agent_id);
        }
    }

    /// Pre-authenticate the standing system agents.
    pub fn seed_system_agents(&self) {
        let system_agents = [
            ("system-architect", AgentRole::ExpertAgent),
            ("security-architect", AgentRole::ExpertAgent),
            ("infrastructure-architect", AgentRole::ExpertAgent),
            ("lighthouse-bridge", AgentRole::SystemAgent),
            ("lighthouse-admin", AgentRole::Admin),
        ];

        for (agent_id, role) in system_agents {
            let token = self.create_token(agent_id);
            if self.authenticate(agent_id, &token, role).is_err() {
                debug!(agent_id, "Skipping system agent seed");
            }
        }
        info!(count = system_agents.len(), "Seeded system agents");
    }

    /// Shared secret, for components that derive keys from it.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.inner.secret
    }

    /// Close the registry; further authentication is refused.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut agents) = self.inner.agents.write() {
            agents.clear();
        }
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Authorization gate over an [`IdentityRegistry`] with per-agent sliding
/// window rate enforcement.
pub struct Authorizer {
    registry: IdentityRegistry,
    /// Request timestamps (Unix seconds) per agent within the last minute.
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl Authorizer {
    /// Create an authorizer over the shared registry.
    #[must_use]
    pub fn new(registry: IdentityRegistry) -> Self {
        Self {
            registry,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Authorize a read operation.
    ///
    /// # Errors
    ///
    /// Fails when the agent is unknown, expired, unpermitted, out of scope,
    /// or over its request budget.
    pub fn authorize_read(
        &self,
        agent_id: &str,
        aggregate_id: Option<&str>,
    ) -> Result<AgentIdentity, AuthError> {
        let identity = self.validated_identity(agent_id)?;
        self.require(&identity, Permission::ReadEvents)?;
        if let Some(aggregate_id) = aggregate_id {
            if !identity.can_access_aggregate(aggregate_id) {
                return Err(AuthError::AggregateDenied {
                    agent_id: agent_id.to_string(),
                    aggregate_id: aggregate_id.to_string(),
                });
            }
        }
        self.check_rate(&identity)?;
        Ok(identity)
    }

    /// Authorize a write of `batch_size` events.
    ///
    /// # Errors
    ///
    /// See [`Authorizer::authorize_read`]; additionally fails when the
    /// batch exceeds the role budget.
    pub fn authorize_write(
        &self,
        agent_id: &str,
        batch_size: usize,
        aggregate_id: Option<&str>,
    ) -> Result<AgentIdentity, AuthError> {
        let identity = self.validated_identity(agent_id)?;
        self.require(&identity, Permission::WriteEvents)?;

        if batch_size > identity.max_batch_size {
            return Err(AuthError::BatchTooLarge {
                agent_id: agent_id.to_string(),
                size: batch_size,
                limit: identity.max_batch_size,
            });
        }
        if let Some(aggregate_id) = aggregate_id {
            if !identity.can_access_aggregate(aggregate_id) {
                return Err(AuthError::AggregateDenied {
                    agent_id: agent_id.to_string(),
                    aggregate_id: aggregate_id.to_string(),
                });
            }
        }
        self.check_rate(&identity)?;
        Ok(identity)
    }

    /// Authorize a query operation.
    ///
    /// # Errors
    ///
    /// See [`Authorizer::authorize_read`].
    pub fn authorize_query(&self, agent_id: &str) -> Result<AgentIdentity, AuthError> {
        let identity = self.validated_identity(agent_id)?;
        self.require(&identity, Permission::QueryEvents)?;
        self.check_rate(&identity)?;
        Ok(identity)
    }

    /// Authorize an administrative operation.
    ///
    /// # Errors
    ///
    /// Fails when the agent is unknown, expired, or not an administrator.
    pub fn authorize_admin(&self, agent_id: &str) -> Result<AgentIdentity, AuthError> {
        let identity = self.validated_identity(agent_id)?;
        self.require(&identity, Permission::AdminAccess)?;
        Ok(identity)
    }

    fn validated_identity(&self, agent_id: &str) -> Result<AgentIdentity, AuthError> {
        self.registry
            .get(agent_id)
            .ok_or_else(|| AuthError::NotAuthenticated {
                agent_id: agent_id.to_string(),
            })
    }

    fn require(&self, identity: &AgentIdentity, permission: Permission) -> Result<(), AuthError> {
        if identity.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::MissingPermission {
                agent_id: identity.agent_id.clone(),
                permission,
            })
        }
    }

    fn check_rate(&self, identity: &AgentIdentity) -> Result<(), AuthError> {
        let now = unix_now();
        let cutoff = now.saturating_sub(60);

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows.entry(identity.agent_id.clone()).or_default();

        while window.front().is_some_and(|&ts| ts <= cutoff) {
            window.pop_front();
        }

        if window.len() >= identity.max_requests_per_minute as usize {
            return Err(AuthError::RateLimited {
                agent_id: identity.agent_id.clone(),
                count: window.len() as u32,
            });
        }

        window.push_back(now);
        Ok(())
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

    fn registry() -> IdentityRegistry {
        IdentityRegistry::new(b"test-secret".to_vec())
    }

    #[test]
    fn test_role_permissions() {
        assert!(!AgentRole::Guest
            .permissions()
            .contains(&Permission::WriteEvents));
        assert!(AgentRole::Agent
            .permissions()
            .contains(&Permission::WriteEvents));
        assert!(AgentRole::ExpertAgent
            .permissions()
            .contains(&Permission::ExpertCoordination));
        assert!(AgentRole::Admin
            .permissions()
            .contains(&Permission::SystemAdmin));
    }

    #[test]
    fn test_authenticate_with_minted_token() {
        let registry = registry();
        let token = registry.create_token("agent_a");
        let identity = registry
            .authenticate("agent_a", &token, AgentRole::Agent)
            .unwrap();

        assert_eq!(identity.agent_id, "agent_a");
        assert_eq!(identity.max_requests_per_minute, 1000);
        assert!(registry.get("agent_a").is_some());
    }

    #[test]
    fn test_authenticate_rejects_bad_token() {
        let registry = registry();
        let result = registry.authenticate("agent_a", "12345:deadbeef", AgentRole::Agent);
        assert!(matches!(result, Err(AuthError::InvalidToken { .. })));
    }

    #[test]
    fn test_token_bound_to_agent() {
        let registry = registry();
        let token = registry.create_token("agent_a");
        let result = registry.authenticate("agent_b", &token, AgentRole::Agent);
        assert!(matches!(result, Err(AuthError::InvalidToken { .. })));
    }

    #[test]
    fn test_revoke() {
        let registry = registry();
        let token = registry.create_token("agent_a");
        registry
            .authenticate("agent_a", &token, AgentRole::Agent)
            .unwrap();

        registry.revoke("agent_a");
        assert!(registry.get("agent_a").is_none());
    }

    #[test]
    fn test_closed_registry_refuses() {
        let registry = registry();
        let token = registry.create_token("agent_a");
        registry.close();

        let result = registry.authenticate("agent_a", &token, AgentRole::Agent);
        assert_eq!(result, Err(AuthError::RegistryClosed));
        assert!(registry.is_closed());
    }

    #[test]
    fn test_authorize_write_requires_permission() {
        let registry = registry();
        let token = registry.create_token("watcher");
        registry
            .authenticate("watcher", &token, AgentRole::Guest)
            .unwrap();

        let authorizer = Authorizer::new(registry);
        let result = authorizer.authorize_write("watcher", 1, None);
        assert!(matches!(
            result,
            Err(AuthError::MissingPermission {
                permission: Permission::WriteEvents,
                ..
            })
        ));
    }

    #[test]
    fn test_authorize_unknown_agent() {
        let authorizer = Authorizer::new(registry());
        assert!(matches!(
            authorizer.authorize_query("ghost"),
            Err(AuthError::NotAuthenticated { .. })
        ));
    }

    #[test]
    fn test_batch_budget() {
        let registry = registry();
        let token = registry.create_token("agent_a");
        registry
            .authenticate("agent_a", &token, AgentRole::Agent)
            .unwrap();

        let authorizer = Authorizer::new(registry);
        assert!(authorizer.authorize_write("agent_a", 100, None).is_ok());
        assert!(matches!(
            authorizer.authorize_write("agent_a", 101, None),
            Err(AuthError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn test_rate_window() {
        let registry = registry();
        let token = registry.create_token("guest_1");
        registry
            .authenticate("guest_1", &token, AgentRole::Guest)
            .unwrap();

        let authorizer = Authorizer::new(registry);
        for _ in 0..100 {
            authorizer.authorize_read("guest_1", None).unwrap();
        }
        assert!(matches!(
            authorizer.authorize_read("guest_1", None),
            Err(AuthError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_seed_system_agents() {
        let registry = registry();
        registry.seed_system_agents();
        assert!(registry.get("lighthouse-bridge").is_some());
        assert!(registry.get("lighthouse-admin").is_some());
    }
}
