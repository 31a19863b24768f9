//! # Expert Coordination - Capability-Matched Delegation
//!
//! Secure multi-agent coordination front end over the event store:
//!
//! - Expert registration gated on permissions and a minute-bucket HMAC
//!   challenge
//! - Token authentication with heartbeat refresh
//! - Command delegation with security rules and capability-superset
//!   matching, scored by performance with a deterministic tie-break
//! - Time-bounded collaboration sessions with per-participant opaque
//!   communication channels
//!
//! Session/participant membership is held in two explicit indices
//! (`RegisteredExpert::collaboration_sessions` and
//! `CollaborationSession::participants`), never via back-references.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod coordinator;
pub mod errors;
pub mod registry;

pub use coordinator::{
    CollaborationSession, CoordinatorConfig, CoordinatorStats, Delegation, ExpertCoordinator,
};
pub use errors::CoordinationError;
pub use registry::{ExpertCapability, ExpertRegistry, ExpertStatus, RegisteredExpert};
