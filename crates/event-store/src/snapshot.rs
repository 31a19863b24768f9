//! # Projection Snapshots
//!
//! Binary-packed state snapshots living in a `snapshots/` sibling
//! directory. Each snapshot is gzip-compressed bincode accompanied by a
//! JSON manifest carrying the corresponding `event_sequence`, a SHA-256
//! `checksum` of the serialized state, and `size_bytes`. Rebuilding from
//! the latest snapshot plus the events after it must equal a full rebuild.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_crypto::sha256_hex;
use shared_types::event::now_ms;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors from snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("Snapshot I/O failure during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded or decoded.
    #[error("Snapshot serialization failed: {message}")]
    Serialization { message: String },

    /// Stored checksum does not match the recomputed one.
    #[error("Snapshot checksum mismatch at sequence {event_sequence}")]
    ChecksumMismatch { event_sequence: u64 },
}

impl SnapshotError {
    fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}

/// Manifest describing a stored snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: Uuid,
    /// Last event sequence folded into the snapshot.
    pub event_sequence: u64,
    pub created_at_ms: u64,
    /// SHA-256 of the uncompressed serialized state.
    pub checksum: String,
    /// Uncompressed state size.
    pub size_bytes: u64,
    pub compression: String,
    pub format_version: u32,
}

/// Stores and retrieves binary-packed projection snapshots.
pub struct SnapshotStore {
    dir: PathBuf,
    /// Maximum snapshots retained by `cleanup`.
    max_snapshots: usize,
}

impl SnapshotStore {
    /// Default retention.
    pub const DEFAULT_MAX_SNAPSHOTS: usize = 100;

    /// Open (or create) a snapshot store under `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SnapshotError::io("create_dir", e))?;
        Ok(Self {
            dir,
            max_snapshots: Self::DEFAULT_MAX_SNAPSHOTS,
        })
    }

    /// Persist a snapshot of `state` taken at `event_sequence`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `Io` failures; no partial snapshot is
    /// left behind on error.
    pub fn save<T: Serialize>(
        &self,
        state: &T,
        event_sequence: u64,
    ) -> Result<SnapshotManifest, SnapshotError> {
        let bytes = bincode::serialize(state).map_err(|e| SnapshotError::Serialization {
            message: e.to_string(),
        })?;

        let manifest = SnapshotManifest {
            snapshot_id: Uuid::new_v4(),
            event_sequence,
            created_at_ms: now_ms(),
            checksum: sha256_hex(&bytes),
            size_bytes: bytes.len() as u64,
            compression: "gzip".to_string(),
            format_version: 1,
        };

        let data_path = self.data_path(event_sequence);
        let tmp_path = data_path.with_extension("tmp");
        {
            let file = File::create(&tmp_path).map_err(|e| SnapshotError::io("create", e))?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder
                .write_all(&bytes)
                .map_err(|e| SnapshotError::io("write", e))?;
            encoder
                .finish()
                .and_then(|file| file.sync_all())
                .map_err(|e| SnapshotError::io("sync", e))?;
        }
        std::fs::rename(&tmp_path, &data_path).map_err(|e| SnapshotError::io("rename", e))?;

        let manifest_json =
            serde_json::to_vec_pretty(&manifest).map_err(|e| SnapshotError::Serialization {
                message: e.to_string(),
            })?;
        std::fs::write(self.manifest_path(event_sequence), manifest_json)
            .map_err(|e| SnapshotError::io("write_manifest", e))?;

        info!(
            event_sequence,
            size_bytes = manifest.size_bytes,
            "Snapshot created"
        );
        Ok(manifest)
    }

    /// Load the snapshot with the highest `event_sequence`, skipping any
    /// whose checksum fails.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the directory listing fails.
    pub fn load_latest<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<(SnapshotManifest, T)>, SnapshotError> {
        let mut sequences = self.stored_sequences()?;
        sequences.sort_unstable();

        for sequence in sequences.into_iter().rev() {
            match self.load_at(sequence) {
                Ok(Some(loaded)) => return Ok(Some(loaded)),
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, sequence, "Skipping unreadable snapshot");
                }
            }
        }
        Ok(None)
    }

    /// Load the snapshot taken at exactly `event_sequence`.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` when the state does not match its
    /// manifest, `Serialization` when decoding fails, or `Io` on read
    /// failure.
    pub fn load_at<T: DeserializeOwned>(
        &self,
        event_sequence: u64,
    ) -> Result<Option<(SnapshotManifest, T)>, SnapshotError> {
        let manifest_path = self.manifest_path(event_sequence);
        if !manifest_path.exists() {
            return Ok(None);
        }

        let manifest_bytes =
            std::fs::read(&manifest_path).map_err(|e| SnapshotError::io("read_manifest", e))?;
        let manifest: SnapshotManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| SnapshotError::Serialization {
                message: e.to_string(),
            })?;

        let file = File::open(self.data_path(event_sequence))
            .map_err(|e| SnapshotError::io("open", e))?;
        let mut bytes = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut bytes)
            .map_err(|e| SnapshotError::io("read", e))?;

        if sha256_hex(&bytes) != manifest.checksum {
            return Err(SnapshotError::ChecksumMismatch { event_sequence });
        }

        let state = bincode::deserialize(&bytes).map_err(|e| SnapshotError::Serialization {
            message: e.to_string(),
        })?;
        Ok(Some((manifest, state)))
    }

    /// Remove oldest snapshots past the retention cap.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the directory listing fails; individual removal
    /// failures are logged and skipped.
    pub fn cleanup(&self) -> Result<usize, SnapshotError> {
        let mut sequences = self.stored_sequences()?;
        sequences.sort_unstable();

        let excess = sequences.len().saturating_sub(self.max_snapshots);
        let mut removed = 0;
        for sequence in sequences.into_iter().take(excess) {
            let data = self.data_path(sequence);
            let manifest = self.manifest_path(sequence);
            match std::fs::remove_file(&data).and_then(|()| std::fs::remove_file(&manifest)) {
                Ok(()) => removed += 1,
                Err(error) => warn!(%error, sequence, "Snapshot cleanup failed"),
            }
        }
        Ok(removed)
    }

    fn stored_sequences(&self) -> Result<Vec<u64>, SnapshotError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| SnapshotError::io("read_dir", e))?;
        Ok(entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("snapshot_")?
                    .strip_suffix(".manifest.json")?
                    .parse()
                    .ok()
            })
            .collect())
    }

    fn data_path(&self, event_sequence: u64) -> PathBuf {
        self.dir.join(format!("snapshot_{event_sequence:012}.bin.gz"))
    }

    fn manifest_path(&self, event_sequence: u64) -> PathBuf {
        self.dir
            .join(format!("snapshot_{event_sequence:012}.manifest.json"))
    }

    /// Directory holding the snapshots.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
