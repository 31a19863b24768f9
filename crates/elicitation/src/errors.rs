//! # Elicitation Errors
//!
//! Every failure carries a machine-readable kind and a severity tag.
//! Security-severity failures always leave an audit record.

use crate::audit::Severity;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors from elicitation operations.
#[derive(Debug, Error)]
pub enum ElicitationError {
    /// The requester or responder bucket is empty.
    #[error("Rate limit exceeded for agent {agent_id}")]
    RateLimitExceeded { agent_id: String },

    /// The generated nonce collided with an existing one.
    #[error("Failed to store nonce for elicitation")]
    NonceStoreFailure,

    /// The presented session token failed validation.
    #[error("Invalid agent session token for {agent_id}")]
    InvalidSession { agent_id: String },

    /// A non-addressed agent attempted to respond.
    #[error(
        "Agent {agent_id} not authorized to respond to elicitation {elicitation_id} addressed to {expected_agent}"
    )]
    UnauthorizedResponse {
        agent_id: String,
        expected_agent: String,
        elicitation_id: String,
    },

    /// A non-owner attempted to cancel.
    #[error("Only {owner} can cancel elicitation {elicitation_id}, not {agent_id}")]
    UnauthorizedCancel {
        agent_id: String,
        owner: String,
        elicitation_id: String,
    },

    /// Nonce reuse detected.
    #[error("Replay attack detected for elicitation {elicitation_id}")]
    ReplayAttack { elicitation_id: String },

    /// The derived response key does not match the stored one.
    #[error("Response key mismatch for elicitation {elicitation_id}")]
    SignatureMismatch { elicitation_id: String },

    /// Accept data does not satisfy the request schema.
    #[error("Response for {elicitation_id} missing required field {missing_field}")]
    SchemaViolation {
        elicitation_id: String,
        missing_field: String,
    },

    /// The request deadline passed.
    #[error("Elicitation {elicitation_id} has expired")]
    Expired { elicitation_id: String },

    /// Unknown or already-terminal elicitation.
    #[error("Elicitation {elicitation_id} not found")]
    NotFound { elicitation_id: String },

    /// Malformed caller input.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// New elicitations are refused while the emergency rollback flag is
    /// set.
    #[error("Elicitation feature is in emergency rollback")]
    EmergencyRollback,

    /// Event store failure.
    #[error("Event store failure: {0}")]
    Store(#[from] EventStoreError),

    /// The manager is shutting down.
    #[error("Elicitation manager is shut down")]
    Shutdown,
}

impl ElicitationError {
    /// Machine-readable failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::NonceStoreFailure => "nonce_store_failure",
            Self::InvalidSession { .. } => "invalid_session",
            Self::UnauthorizedResponse { .. } => "unauthorized_response",
            Self::UnauthorizedCancel { .. } => "unauthorized_cancel",
            Self::ReplayAttack { .. } => "replay_attack",
            Self::SignatureMismatch { .. } => "signature_mismatch",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::Expired { .. } => "expired",
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::EmergencyRollback => "emergency_rollback",
            Self::Store(_) => "store",
            Self::Shutdown => "shutdown",
        }
    }

    /// Severity tag for auditing.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnauthorizedResponse { .. }
            | Self::ReplayAttack { .. }
            | Self::SignatureMismatch { .. } => Severity::Critical,
            Self::UnauthorizedCancel { .. } | Self::InvalidSession { .. } => Severity::High,
            Self::RateLimitExceeded { .. }
            | Self::SchemaViolation { .. }
            | Self::NotFound { .. }
            | Self::Expired { .. } => Severity::Medium,
            _ => Severity::Info,
        }
    }
}
