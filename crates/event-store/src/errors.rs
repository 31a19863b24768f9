//! # Event Store Errors
//!
//! One error type per failure class. Validation failures surface as
//! `security`, auth failures as `auth`, resource caps as `resource`, and
//! storage failures as `io`. Failures before sequence assignment leave no
//! state change; write failures after assignment quarantine the store.

use crate::auth::AuthError;
use crate::resource::ResourceError;
use crate::validation::ValidationError;
use thiserror::Error;

/// Errors from event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Event exceeds the per-event size bound.
    #[error("Event size {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },

    /// Input validation rejected the event or batch.
    #[error("Security validation failed: {0}")]
    Security(#[from] ValidationError),

    /// Authentication or authorization failed.
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// A resource cap refused the operation.
    #[error("Resource limit exceeded: {0}")]
    Resource(#[from] ResourceError),

    /// Storage I/O failure.
    #[error("Storage I/O failure during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Event could not be serialized or deserialized.
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// A write failed after sequence assignment; the store refuses all
    /// further operations until restarted.
    #[error("Event store is quarantined after a failed write")]
    Quarantined,

    /// The store is shutting down.
    #[error("Event store is shut down")]
    Shutdown,
}

impl EventStoreError {
    /// Machine-readable failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SizeExceeded { .. } => "size_exceeded",
            Self::Security(_) => "security",
            Self::Auth(_) => "auth",
            Self::Resource(_) => "resource",
            Self::Io { .. } | Self::Serialization { .. } | Self::Quarantined => "io",
            Self::Shutdown => "shutdown",
        }
    }

    pub(crate) fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}
