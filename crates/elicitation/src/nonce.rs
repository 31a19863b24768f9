//! # Nonce Store
//!
//! Single-use nonces with TTL for replay protection. One mutex guards set
//! membership and TTL metadata together; the lock is held only across
//! those writes. Consumed nonces retain membership until the TTL sweep so
//! that replays keep failing after a response lands.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from nonce operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// The nonce is already present (replay on store).
    #[error("Nonce already used")]
    Duplicate,

    /// The nonce is unknown (replay on consume, or never stored).
    #[error("Nonce not found")]
    Unknown,
}

/// Metadata tracked per stored nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonceRecord {
    pub elicitation_id: String,
    pub stored_at_ms: u64,
    pub expires_at_ms: u64,
    pub consumed: bool,
    pub consumed_at_ms: Option<u64>,
}

#[derive(Default)]
struct NonceInner {
    used: HashSet<String>,
    metadata: HashMap<String, NonceRecord>,
}

/// Secure nonce storage for replay protection.
#[derive(Default)]
pub struct NonceStore {
    inner: Mutex<NonceInner>,
}

impl NonceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh nonce with a TTL.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` when the nonce is already present, which is
    /// treated as an attempted replay.
    pub fn store_nonce(
        &self,
        nonce: &str,
        elicitation_id: &str,
        ttl_secs: u64,
    ) -> Result<(), NonceError> {
        let now = now_ms();
        let mut inner = self.lock();

        if inner.used.contains(nonce) {
            warn!(
                nonce_prefix = &nonce[..nonce.len().min(8)],
                "Replay attack detected: nonce already used"
            );
            return Err(NonceError::Duplicate);
        }

        inner.used.insert(nonce.to_string());
        inner.metadata.insert(
            nonce.to_string(),
            NonceRecord {
                elicitation_id: elicitation_id.to_string(),
                stored_at_ms: now,
                expires_at_ms: now + ttl_secs * 1000,
                consumed: false,
                consumed_at_ms: None,
            },
        );
        Ok(())
    }

    /// Consume a nonce for response verification. The nonce stays in the
    /// set (marked consumed) to keep blocking replays until its TTL.
    ///
    /// # Errors
    ///
    /// Returns `Unknown` when the nonce was never stored, and `Duplicate`
    /// when it was already consumed.
    pub fn consume_nonce(&self, nonce: &str) -> Result<(), NonceError> {
        let mut inner = self.lock();
        if !inner.used.contains(nonce) {
            return Err(NonceError::Unknown);
        }

        let Some(record) = inner.metadata.get_mut(nonce) else {
            return Err(NonceError::Unknown);
        };
        if record.consumed {
            return Err(NonceError::Duplicate);
        }

        record.consumed = true;
        record.consumed_at_ms = Some(now_ms());
        Ok(())
    }

    /// Whether a nonce is currently present.
    #[must_use]
    pub fn contains(&self, nonce: &str) -> bool {
        self.lock().used.contains(nonce)
    }

    /// Metadata for a nonce.
    #[must_use]
    pub fn record(&self, nonce: &str) -> Option<NonceRecord> {
        self.lock().metadata.get(nonce).cloned()
    }

    /// Number of stored nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().used.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().used.is_empty()
    }

    /// Remove nonces past their TTL; returns the count removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_ms();
        let mut inner = self.lock();

        let expired: Vec<String> = inner
            .metadata
            .iter()
            .filter(|(_, record)| record.expires_at_ms < now)
            .map(|(nonce, _)| nonce.clone())
            .collect();

        for nonce in &expired {
            inner.used.remove(nonce);
            inner.metadata.remove(nonce);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Cleaned up expired nonces");
        }
        expired.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NonceInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
