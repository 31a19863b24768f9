//! # Feature Flags
//!
//! Persisted JSON flag file maintained by the external rollout
//! controller. The manager honors exactly one thing here: while
//! `emergency_rollback` is set on the elicitation flag, new elicitations
//! are refused. Rollout state is otherwise invisible to the core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};

/// Flag gating the elicitation feature itself.
pub const FLAG_ELICITATION_ENABLED: &str = "elicitation_enabled";
/// Flag for the hardened security path.
pub const FLAG_SECURITY_ENHANCED: &str = "elicitation_security_enhanced";
/// Flag deprecating the legacy passive-polling API.
pub const FLAG_WAIT_FOR_MESSAGES_DEPRECATED: &str = "wait_for_messages_deprecated";
/// Flag for performance monitoring hooks.
pub const FLAG_PERFORMANCE_MONITORING: &str = "elicitation_performance_monitoring";
/// Flag for the A/B rollout experiment.
pub const FLAG_AB_TEST: &str = "elicitation_ab_test";

/// Errors from flag persistence.
#[derive(Debug, Error)]
pub enum FeatureFlagError {
    #[error("Flag file I/O failure: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Flag file malformed: {message}")]
    Malformed { message: String },
}

/// State of a single flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    pub status: String,
    pub rollout_percentage: f64,
    pub updated_at: String,
    pub emergency_rollback: bool,
}

impl Default for FlagState {
    fn default() -> Self {
        Self {
            status: "disabled".to_string(),
            rollout_percentage: 0.0,
            updated_at: String::new(),
            emergency_rollback: false,
        }
    }
}

/// The persisted flag set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub flags: BTreeMap<String, FlagState>,
}

impl FeatureFlags {
    /// Flag set with every known flag present and disabled.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut flags = BTreeMap::new();
        for name in [
            FLAG_ELICITATION_ENABLED,
            FLAG_SECURITY_ENHANCED,
            FLAG_WAIT_FOR_MESSAGES_DEPRECATED,
            FLAG_PERFORMANCE_MONITORING,
            FLAG_AB_TEST,
        ] {
            flags.insert(name.to_string(), FlagState::default());
        }
        Self { flags }
    }
}

/// Loads and caches the persisted flag file.
pub struct FeatureFlagStore {
    path: PathBuf,
    cached: RwLock<FeatureFlags>,
}

impl FeatureFlagStore {
    /// Load the flag file, falling back to defaults when absent.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let flags = Self::read_file(&path).unwrap_or_else(|error| {
            info!(%error, path = %path.display(), "Flag file unavailable, using defaults");
            FeatureFlags::with_defaults()
        });

        Self {
            path,
            cached: RwLock::new(flags),
        }
    }

    /// Re-read the flag file; keeps the cached state on failure.
    pub fn reload(&self) {
        match Self::read_file(&self.path) {
            Ok(flags) => {
                if let Ok(mut cached) = self.cached.write() {
                    *cached = flags;
                }
            }
            Err(error) => {
                warn!(%error, path = %self.path.display(), "Flag reload failed, keeping cached state");
            }
        }
    }

    /// Whether new elicitations must be refused.
    #[must_use]
    pub fn emergency_rollback_active(&self) -> bool {
        self.cached
            .read()
            .map(|flags| {
                flags
                    .flags
                    .get(FLAG_ELICITATION_ENABLED)
                    .is_some_and(|flag| flag.emergency_rollback)
            })
            .unwrap_or(false)
    }

    /// Current state of one flag.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<FlagState> {
        self.cached
            .read()
            .ok()
            .and_then(|flags| flags.flags.get(name).cloned())
    }

    /// Persist the given flag set (used by tests and tooling; production
    /// writes come from the rollout controller).
    ///
    /// # Errors
    ///
    /// Returns I/O or serialization failures.
    pub fn save(&self, flags: &FeatureFlags) -> Result<(), FeatureFlagError> {
        let json =
            serde_json::to_vec_pretty(flags).map_err(|e| FeatureFlagError::Malformed {
                message: e.to_string(),
            })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        if let Ok(mut cached) = self.cached.write() {
            *cached = flags.clone();
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<FeatureFlags, FeatureFlagError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| FeatureFlagError::Malformed {
            message: e.to_string(),
        })
    }
}
