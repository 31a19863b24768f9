//! # Resource Limits
//!
//! Disk usage cap, free-space buffer, and open file-handle tracking.
//! Operations that would exceed a cap are refused with a `resource` error;
//! retries may succeed once pressure subsides.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::warn;

/// Errors from resource cap enforcement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Projected disk usage exceeds the configured cap.
    #[error("Disk usage {used} + {incoming} bytes would exceed cap of {cap} bytes")]
    DiskCapExceeded { used: u64, incoming: u64, cap: u64 },

    /// Not enough free space for the incoming write plus buffer.
    #[error("Free space {free} bytes below required {required} bytes")]
    InsufficientFreeSpace { free: u64, required: u64 },

    /// Open file-handle cap reached.
    #[error("Open file handles {open} at cap {cap}")]
    FileHandleLimit { open: usize, cap: usize },
}

/// Tracks and enforces storage resource caps.
#[derive(Debug)]
pub struct ResourceLimiter {
    max_disk_usage: u64,
    max_file_handles: usize,
    open_handles: AtomicUsize,
}

impl ResourceLimiter {
    /// Free-space multiple required over the incoming write size.
    pub const FREE_SPACE_FACTOR: u64 = 2;

    /// Create a limiter with the given caps.
    #[must_use]
    pub fn new(max_disk_usage: u64, max_file_handles: usize) -> Self {
        Self {
            max_disk_usage,
            max_file_handles,
            open_handles: AtomicUsize::new(0),
        }
    }

    /// Check that writing `incoming` bytes keeps the directory under the
    /// disk cap.
    ///
    /// # Errors
    ///
    /// Returns `DiskCapExceeded` when the projection crosses the cap.
    pub fn check_disk_usage(&self, data_dir: &Path, incoming: u64) -> Result<(), ResourceError> {
        let used = directory_usage(data_dir);
        if used.saturating_add(incoming) > self.max_disk_usage {
            return Err(ResourceError::DiskCapExceeded {
                used,
                incoming,
                cap: self.max_disk_usage,
            });
        }
        Ok(())
    }

    /// Check that the filesystem keeps a free-space buffer of at least
    /// twice the incoming size.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFreeSpace` when the buffer cannot be kept.
    pub fn check_available_space(
        &self,
        data_dir: &Path,
        incoming: u64,
    ) -> Result<(), ResourceError> {
        let required = incoming.saturating_mul(Self::FREE_SPACE_FACTOR);
        match fs2::available_space(data_dir) {
            Ok(free) if free >= required => Ok(()),
            Ok(free) => Err(ResourceError::InsufficientFreeSpace { free, required }),
            Err(error) => {
                // Treat probe failure as non-fatal; the write itself will
                // surface real I/O errors.
                warn!(%error, "Free-space probe failed");
                Ok(())
            }
        }
    }

    /// Acquire a file handle slot.
    ///
    /// # Errors
    ///
    /// Returns `FileHandleLimit` at the cap.
    pub fn acquire_file_handle(&self) -> Result<(), ResourceError> {
        let open = self.open_handles.fetch_add(1, Ordering::SeqCst);
        if open >= self.max_file_handles {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
            return Err(ResourceError::FileHandleLimit {
                open,
                cap: self.max_file_handles,
            });
        }
        Ok(())
    }

    /// Release a file handle slot.
    pub fn release_file_handle(&self) {
        let _ = self
            .open_handles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Currently tracked open handles.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

/// Total size of `*.log` and `*.log.gz` files in a directory.
#[must_use]
pub fn directory_usage(data_dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.ends_with(".log") || name.ends_with(".log.gz")
        })
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_disk_cap() {
        let temp = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(temp.path().join("events_000001.log")).unwrap();
        file.write_all(&[0u8; 1024]).unwrap();

        let limiter = ResourceLimiter::new(2048, 10);
        assert!(limiter.check_disk_usage(temp.path(), 512).is_ok());
        assert!(matches!(
            limiter.check_disk_usage(temp.path(), 2048),
            Err(ResourceError::DiskCapExceeded { .. })
        ));
    }

    #[test]
    fn test_usage_counts_only_segments() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("events_000001.log"), [0u8; 100]).unwrap();
        std::fs::write(temp.path().join("events_000002.log.gz"), [0u8; 50]).unwrap();
        std::fs::write(temp.path().join("notes.txt"), [0u8; 999]).unwrap();

        assert_eq!(directory_usage(temp.path()), 150);
    }

    #[test]
    fn test_file_handle_cap() {
        let limiter = ResourceLimiter::new(u64::MAX, 2);
        assert!(limiter.acquire_file_handle().is_ok());
        assert!(limiter.acquire_file_handle().is_ok());
        assert!(matches!(
            limiter.acquire_file_handle(),
            Err(ResourceError::FileHandleLimit { .. })
        ));

        limiter.release_file_handle();
        assert!(limiter.acquire_file_handle().is_ok());
        assert_eq!(limiter.open_handles(), 2);
    }

    #[test]
    fn test_release_never_underflows() {
        let limiter = ResourceLimiter::new(u64::MAX, 2);
        limiter.release_file_handle();
        assert_eq!(limiter.open_handles(), 0);
    }
}
