//! # Segmented Binary Log
//!
//! Record layout (bit-exact wire format):
//!
//! ```text
//! [length: 4-byte big-endian][hmac: 32 bytes][payload: length bytes]
//! ```
//!
//! The HMAC is SHA-256 over the payload keyed by the store secret and
//! authenticates the record, not merely its integrity. Records that fail
//! the HMAC are skipped on read and counted as recovery anomalies.
//!
//! Segments are named `events_NNNNNN.log`; at the roll threshold the
//! current segment is gzip-compressed in place to `events_NNNNNN.log.gz`
//! and a new segment is opened.

use crate::config::SyncPolicy;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use shared_crypto::{constant_time_eq, hmac_sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bytes of framing before the payload: length prefix plus HMAC.
pub const RECORD_HEADER_LEN: usize = 4 + 32;

/// Segment filename prefix.
pub const SEGMENT_PREFIX: &str = "events_";

/// Encode a payload into a length-prefixed, HMAC-authenticated record.
#[must_use]
pub fn encode_record(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let hmac = hmac_sha256(secret, payload);
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    record.extend_from_slice(&hmac);
    record.extend_from_slice(payload);
    record
}

/// Iterator over authenticated payloads in a segment's content.
///
/// Truncated or tampered records are skipped; `skipped()` reports how many.
pub struct RecordIter<'a> {
    secret: &'a [u8],
    content: &'a [u8],
    offset: usize,
    skipped: u64,
}

impl<'a> RecordIter<'a> {
    /// Iterate over the records in `content`.
    #[must_use]
    pub fn new(secret: &'a [u8], content: &'a [u8]) -> Self {
        Self {
            secret,
            content,
            offset: 0,
            skipped: 0,
        }
    }

    /// Number of records skipped so far due to truncation or HMAC failure.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let remaining = self.content.len().checked_sub(self.offset)?;
            if remaining < RECORD_HEADER_LEN {
                if remaining > 0 {
                    self.skipped += 1;
                }
                return None;
            }

            let length_bytes: [u8; 4] = self.content[self.offset..self.offset + 4]
                .try_into()
                .ok()?;
            let length = u32::from_be_bytes(length_bytes) as usize;
            let payload_start = self.offset + RECORD_HEADER_LEN;

            let Some(payload_end) = payload_start.checked_add(length) else {
                self.skipped += 1;
                return None;
            };
            if payload_end > self.content.len() {
                // Truncated tail record, e.g. a crash mid-write.
                self.skipped += 1;
                return None;
            }

            let stored_hmac = &self.content[self.offset + 4..payload_start];
            let payload = &self.content[payload_start..payload_end];
            self.offset = payload_end;

            let expected = hmac_sha256(self.secret, payload);
            if constant_time_eq(&expected, stored_hmac) {
                return Some(payload);
            }

            // Unauthenticated record: skip and keep scanning.
            self.skipped += 1;
        }
    }
}

/// Path of segment number `n` inside `dir`.
#[must_use]
pub fn segment_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{number:06}.log"))
}

/// Parse the segment number out of a segment filename.
#[must_use]
pub fn segment_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".log.gz")
        .or_else(|| name.strip_suffix(".log"))?;
    stem.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// All segment files in `dir` (`.log` and `.log.gz`), sorted by number.
///
/// # Errors
///
/// Returns the I/O error from listing the directory.
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut segments: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| segment_number(path).is_some())
        .collect();
    segments.sort_by_key(|path| segment_number(path).unwrap_or(u64::MAX));
    Ok(segments)
}

/// Read a segment's full content, transparently decompressing `.log.gz`.
///
/// # Errors
///
/// Returns the I/O error from reading or decompressing.
pub fn read_segment(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut content = Vec::new();

    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(file).read_to_end(&mut content)?;
    } else {
        file.read_to_end(&mut content)?;
    }
    Ok(content)
}

/// Gzip-compress a rolled segment in place, removing the original.
///
/// # Errors
///
/// Returns the I/O error from compression or cleanup.
pub fn compress_segment(path: &Path) -> std::io::Result<PathBuf> {
    let compressed_path = PathBuf::from(format!("{}.gz", path.display()));

    let mut input = File::open(path)?;
    let output = File::create(&compressed_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;

    std::fs::remove_file(path)?;
    debug!(path = %compressed_path.display(), "Compressed rolled segment");
    Ok(compressed_path)
}

/// Append-side handle on the current segment file.
pub struct SegmentWriter {
    dir: PathBuf,
    path: PathBuf,
    file: File,
    written: u64,
    max_segment_size: u64,
    compress_rolled: bool,
}

impl SegmentWriter {
    /// Open the next segment after the highest existing one.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from listing or opening.
    pub fn open_next(
        dir: &Path,
        max_segment_size: u64,
        compress_rolled: bool,
    ) -> std::io::Result<Self> {
        let next_number = list_segments(dir)?
            .iter()
            .filter_map(|path| segment_number(path))
            .max()
            .unwrap_or(0)
            + 1;

        let path = segment_path(dir, next_number);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        debug!(path = %path.display(), "Opened segment for append");
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file,
            written,
            max_segment_size,
            compress_rolled,
        })
    }

    /// Write a pre-encoded record.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the write.
    pub fn write_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        self.file.write_all(record)?;
        self.written += record.len() as u64;
        Ok(())
    }

    /// Apply the durability policy.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the sync call.
    pub fn sync(&mut self, policy: SyncPolicy) -> std::io::Result<()> {
        match policy {
            SyncPolicy::Fsync => self.file.sync_all(),
            SyncPolicy::Fdatasync => self.file.sync_data(),
            SyncPolicy::BatchOnly => Ok(()),
        }
    }

    /// Whether the segment has reached the roll threshold.
    #[must_use]
    pub fn should_roll(&self) -> bool {
        self.written >= self.max_segment_size
    }

    /// Roll to a fresh segment, compressing the finished one when enabled.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from compression or reopening.
    pub fn roll(&mut self) -> std::io::Result<()> {
        self.file.sync_all()?;

        if self.compress_rolled {
            if let Err(error) = compress_segment(&self.path) {
                // Keep the uncompressed segment; readers handle both forms.
                warn!(%error, path = %self.path.display(), "Segment compression failed");
            }
        }

        let next = Self::open_next(&self.dir, self.max_segment_size, self.compress_rolled)?;
        *self = next;
        Ok(())
    }

    /// Bytes written to the current segment.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path of the current segment.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
