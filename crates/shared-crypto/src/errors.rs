//! Errors for cryptographic operations.

use thiserror::Error;

/// Errors from token and signature operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Token does not have the expected shape.
    #[error("Invalid token format")]
    InvalidTokenFormat,

    /// Token timestamp is outside the accepted skew window.
    #[error("Token expired or clock skew too large: age {age_secs}s, window {window_secs}s")]
    TokenExpired { age_secs: u64, window_secs: u64 },

    /// HMAC verification failed.
    #[error("Invalid authentication token")]
    InvalidSignature,

    /// Token is bound to a different agent.
    #[error("Token bound to agent {expected}, presented by {actual}")]
    AgentMismatch { expected: String, actual: String },
}
