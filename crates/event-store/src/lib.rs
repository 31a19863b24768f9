//! # Event Store - Durable Authenticated Append-Only Log
//!
//! File-based event store backing the coordination bridge:
//!
//! - Segmented binary log (`events_NNNNNN.log`, gzip-compressed on roll)
//!   with length-prefixed, HMAC-SHA256-authenticated records
//! - Global dense sequence assignment under a single write lock
//! - Indexed queries and lazy restartable streams
//! - Input validation, path confinement, and resource caps
//! - HMAC-token authentication with role-based authorization through an
//!   injected [`IdentityRegistry`]
//! - Binary-packed projection snapshots with checksummed manifests
//!
//! ## Security
//!
//! Records that fail HMAC verification are skipped on read and counted as
//! recovery anomalies. A write failure after sequence assignment
//! quarantines the store.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod auth;
pub mod config;
pub mod errors;
pub mod resource;
pub mod segment;
pub mod snapshot;
pub mod store;
pub mod validation;

// Re-export main types
pub use auth::{AgentIdentity, AgentRole, AuthError, Authorizer, IdentityRegistry, Permission};
pub use config::{EventStoreConfig, SyncPolicy};
pub use errors::EventStoreError;
pub use resource::{ResourceError, ResourceLimiter};
pub use snapshot::{SnapshotError, SnapshotManifest, SnapshotStore};
pub use store::{EventStore, EventStream, StoreStatus, SystemHealth};
pub use validation::{InputValidator, PathValidator, ValidationError};
