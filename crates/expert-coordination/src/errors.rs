//! Errors from expert coordination operations.
//!
//! Every failure is audited; there is no partial registration and no
//! orphaned delegation.

use event_store::{EventStoreError, Permission};
use thiserror::Error;

/// Errors from coordination operations.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The registering identity lacks a required permission.
    #[error("Agent {agent_id} missing required permission {permission}")]
    MissingPermission {
        agent_id: String,
        permission: Permission,
    },

    /// The authentication challenge did not verify.
    #[error("Authentication challenge failed for agent {agent_id}")]
    InvalidChallenge { agent_id: String },

    /// Registration rate limit exceeded.
    #[error("Registration rate limit exceeded for agent {agent_id}")]
    RateLimited { agent_id: String },

    /// The presented token matches no registered expert.
    #[error("Expert authentication failed")]
    AuthenticationFailed,

    /// Command rejected by the security rules.
    #[error("Command rejected: {reason}")]
    CommandRejected { reason: String },

    /// No available expert covers the required capabilities.
    #[error("No capable experts available for {required:?}")]
    NoCapableExpert { required: Vec<String> },

    /// A session participant is not registered.
    #[error("Participant {agent_id} not registered")]
    ParticipantNotRegistered { agent_id: String },

    /// A session participant is not available.
    #[error("Participant {agent_id} not available")]
    ParticipantUnavailable { agent_id: String },

    /// Unknown collaboration session.
    #[error("Collaboration session {session_id} not found")]
    SessionNotFound { session_id: String },

    /// Event store failure.
    #[error("Event store failure: {0}")]
    Store(#[from] EventStoreError),
}

impl CoordinationError {
    /// Machine-readable failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPermission { .. } => "missing_permission",
            Self::InvalidChallenge { .. } => "invalid_challenge",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed => "authentication_failed",
            Self::CommandRejected { .. } => "command_rejected",
            Self::NoCapableExpert { .. } => "no_capable_expert",
            Self::ParticipantNotRegistered { .. } => "participant_not_registered",
            Self::ParticipantUnavailable { .. } => "participant_unavailable",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Store(_) => "store",
        }
    }
}
