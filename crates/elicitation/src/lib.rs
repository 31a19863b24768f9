//! # Elicitation - Secure Agent-to-Agent Requests
//!
//! The secure elicitation core of the coordination bridge. An elicitation
//! is a structured, point-to-point request from one agent to another,
//! expecting a schema-constrained reply within a bounded time.
//!
//! ## Guarantees
//!
//! - At-most-one-response: exactly one terminal event per elicitation
//! - Cryptographic authorization: only the addressed responder can derive
//!   the expected response key
//! - Replay protection: single-use nonces with TTL
//! - Rate limiting: per-agent token buckets with DoS protection
//! - Durable audit trail: event-sourced, rebuildable projection
//!
//! ## Lifecycle
//!
//! ```text
//! pending ── respond(accept)  ──> accepted
//!         ── respond(decline) ──> declined
//!         ── respond(cancel)  ──> cancelled   (requester only)
//!         ── expiry sweep     ──> expired
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod audit;
pub mod errors;
pub mod events;
pub mod flags;
pub mod manager;
pub mod models;
pub mod nonce;
pub mod notify;
pub mod projection;
pub mod rate_limit;

// Re-export main types
pub use audit::{AuditEntry, AuditLogger, Severity};
pub use errors::ElicitationError;
pub use events::ElicitationEventKind;
pub use flags::{FeatureFlagStore, FeatureFlags, FlagState};
pub use manager::{BatchingConfig, ElicitationConfig, ElicitationManager};
pub use models::{
    ElicitationMetrics, ElicitationRequest, ElicitationStatus, ElicitationStatusView,
    PendingElicitation, ResponseType,
};
pub use nonce::{NonceError, NonceStore};
pub use notify::{Notification, NotificationStream, NotificationType};
pub use projection::ElicitationProjection;
pub use rate_limit::{ElicitationRateLimiter, ProtectionLevel, RateLimiterConfig, TokenBucket};
