//! # Event Store Configuration
//!
//! Programmatic configuration with environment-variable defaults. The
//! recognized variables form the deployment contract:
//!
//! - `LIGHTHOUSE_EVENT_STORE_DIR` - data directory for event segments
//! - `LIGHTHOUSE_EVENT_SECRET` - HMAC secret for record authentication
//! - `LIGHTHOUSE_PROJECT_ROOT`, `LIGHTHOUSE_FUSE_ROOT`,
//!   `LIGHTHOUSE_DATA_DIR` - allowed base paths for path validation

use std::env;
use std::path::PathBuf;

/// Environment variable naming the event segment directory.
pub const ENV_EVENT_STORE_DIR: &str = "LIGHTHOUSE_EVENT_STORE_DIR";
/// Environment variable carrying the record-authentication secret.
pub const ENV_EVENT_SECRET: &str = "LIGHTHOUSE_EVENT_SECRET";
/// Environment variables listing allowed base paths.
pub const ENV_ALLOWED_BASE_DIRS: [&str; 3] = [
    "LIGHTHOUSE_PROJECT_ROOT",
    "LIGHTHOUSE_FUSE_ROOT",
    "LIGHTHOUSE_DATA_DIR",
];

/// Durability policy applied after each append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// `fsync` data and metadata after every append.
    Fsync,
    /// `fdatasync` after every append.
    Fdatasync,
    /// Rely on batch flushes only.
    BatchOnly,
}

/// Event store configuration.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Directory holding `events_NNNNNN.log` segments.
    pub data_dir: PathBuf,
    /// HMAC secret authenticating every persisted record.
    pub secret: Vec<u8>,
    /// Node identifier stamped into event IDs.
    pub node_id: String,
    /// Durability policy.
    pub sync_policy: SyncPolicy,
    /// Segment roll threshold in bytes.
    pub max_segment_size: u64,
    /// Whether rolled segments are gzip-compressed in place.
    pub compress_rolled: bool,
    /// Base directories the data directory must live under.
    pub allowed_base_dirs: Vec<PathBuf>,
    /// Total disk usage cap for the data directory.
    pub max_disk_usage: u64,
    /// Open file-handle cap.
    pub max_file_handles: usize,
}

impl EventStoreConfig {
    /// Segment roll threshold: 100 MiB.
    pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;
    /// Disk usage cap: 50 GiB.
    pub const DEFAULT_MAX_DISK_USAGE: u64 = 50 * 1024 * 1024 * 1024;
    /// Open file-handle cap.
    pub const DEFAULT_MAX_FILE_HANDLES: usize = 1000;

    /// Configuration with defaults for the given directory and secret.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, secret: impl Into<Vec<u8>>) -> Self {
        let data_dir = data_dir.into();
        Self {
            allowed_base_dirs: vec![data_dir.clone()],
            data_dir,
            secret: secret.into(),
            node_id: "lighthouse-01".to_string(),
            sync_policy: SyncPolicy::Fsync,
            max_segment_size: Self::DEFAULT_MAX_SEGMENT_SIZE,
            compress_rolled: true,
            max_disk_usage: Self::DEFAULT_MAX_DISK_USAGE,
            max_file_handles: Self::DEFAULT_MAX_FILE_HANDLES,
        }
    }

    /// Configuration from the environment, falling back to
    /// `./data/events` and a generated secret when unset.
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = env::var(ENV_EVENT_STORE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/events"));

        let secret = env::var(ENV_EVENT_SECRET)
            .map(String::into_bytes)
            .unwrap_or_else(|_| shared_crypto::random_hex(32).into_bytes());

        let mut config = Self::new(data_dir, secret);

        let mut allowed: Vec<PathBuf> = ENV_ALLOWED_BASE_DIRS
            .iter()
            .filter_map(|var| env::var(var).ok())
            .map(PathBuf::from)
            .collect();
        if !allowed.is_empty() {
            allowed.push(config.data_dir.clone());
            config.allowed_base_dirs = allowed;
        }

        config
    }

    /// Override the node identifier.
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Override the sync policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }
}
