//! # Session Security - Token Validation and Hijacking Detection
//!
//! Gates both ends of every elicitation with a session-bound HMAC token,
//! detects hijacking, and bounds session lifetime.
//!
//! ## Security Rules
//!
//! - Session token: `"{session_id}:{agent_id}:{issued_ts}:{hmac_sha256}"`,
//!   HMAC recomputed and compared in constant time, bound to the agent
//! - Concurrent sessions per agent capped (default 3); the oldest session
//!   is evicted on overflow
//! - Inactivity timeout (default 3600 s) revokes the session
//! - Suspicious flags: IP change, user-agent change, sustained command
//!   rate above 100/min, lifetime above 8 hours
//! - Inbound message replay: a message hash seen within the last 5 minutes
//!   for the same agent is rejected

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod validator;

pub use validator::{
    SessionInfo, SessionSecurityConfig, SessionSecurityError, SessionSecurityReport,
    SessionSecurityValidator, SessionState,
};
