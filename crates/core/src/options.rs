//! Store configuration.
//!
//! Options recognised at store open, with builder setters and validation.

use thiserror::Error;

/// Default B+tree page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Default number of in-memory page cache frames.
pub const DEFAULT_CACHE_FRAMES: usize = 4096;

/// Default bytes between automatic WAL flushes.
pub const DEFAULT_WAL_FLUSH_SIZE: u64 = 1024 * 1024;

/// Default WAL bytes since last checkpoint that trigger a new one.
pub const DEFAULT_CHECKPOINT_SIZE: u64 = 16 * 1024 * 1024;

/// Default seconds between time-triggered checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 60;

/// Configuration recognised at store open.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bytes per B+tree page (default: 16 KiB).
    pub page_size: usize,

    /// Number of in-memory page cache frames.
    pub page_cache_frames: usize,

    /// Bytes between automatic WAL flushes.
    pub wal_flush_size: u64,

    /// WAL bytes since the last checkpoint that trigger a new one.
    pub checkpoint_size: u64,

    /// Seconds between time-triggered checkpoints.
    pub checkpoint_interval_secs: u64,

    /// Refuse growth that would drop free disk space below this bound.
    pub min_free_disk: u64,

    /// Disallow mutating operations.
    pub read_only: bool,

    /// Lock acquisition timeout in milliseconds; `None` waits unbounded.
    pub lock_timeout_ms: Option<u64>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            page_size: DEFAULT_PAGE_SIZE,
            page_cache_frames: DEFAULT_CACHE_FRAMES,
            wal_flush_size: DEFAULT_WAL_FLUSH_SIZE,
            checkpoint_size: DEFAULT_CHECKPOINT_SIZE,
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
            min_free_disk: 0,
            read_only: false,
            lock_timeout_ms: None,
        }
    }
}

impl StoreOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set page size (builder pattern).
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Set page cache frame count (builder pattern).
    pub fn with_page_cache_frames(mut self, frames: usize) -> Self {
        self.page_cache_frames = frames;
        self
    }

    /// Set WAL flush threshold (builder pattern).
    pub fn with_wal_flush_size(mut self, bytes: u64) -> Self {
        self.wal_flush_size = bytes;
        self
    }

    /// Set checkpoint size trigger (builder pattern).
    pub fn with_checkpoint_size(mut self, bytes: u64) -> Self {
        self.checkpoint_size = bytes;
        self
    }

    /// Set checkpoint time trigger (builder pattern).
    pub fn with_checkpoint_interval_secs(mut self, secs: u64) -> Self {
        self.checkpoint_interval_secs = secs;
        self
    }

    /// Set the free-disk floor (builder pattern).
    pub fn with_min_free_disk(mut self, bytes: u64) -> Self {
        self.min_free_disk = bytes;
        self
    }

    /// Open read-only (builder pattern).
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the lock acquisition timeout (builder pattern).
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = Some(ms);
        self
    }

    /// Validate option coherence.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.page_size < 4096 || !self.page_size.is_power_of_two() {
            return Err(OptionsError::BadPageSize(self.page_size));
        }
        if self.page_cache_frames < 8 {
            return Err(OptionsError::TooFewFrames(self.page_cache_frames));
        }
        if self.checkpoint_size < self.wal_flush_size {
            return Err(OptionsError::CheckpointBelowFlush);
        }
        Ok(())
    }

    /// Configuration for tests: small pages, small thresholds, short
    /// lock timeouts.
    pub fn for_testing() -> Self {
        StoreOptions {
            page_size: 4096,
            page_cache_frames: 64,
            wal_flush_size: 4 * 1024,
            checkpoint_size: 64 * 1024,
            checkpoint_interval_secs: 3600,
            min_free_disk: 0,
            read_only: false,
            lock_timeout_ms: Some(5_000),
        }
    }
}

/// Option validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// Page size must be a power of two and at least 4 KiB.
    #[error("page size must be a power of two >= 4096, got {0}")]
    BadPageSize(usize),

    /// Page cache needs a workable minimum of frames.
    #[error("page cache needs at least 8 frames, got {0}")]
    TooFewFrames(usize),

    /// Checkpoint threshold below flush threshold would checkpoint on every
    /// flush.
    #[error("checkpoint_size must be >= wal_flush_size")]
    CheckpointBelowFlush,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(StoreOptions::default().validate().is_ok());
        assert!(StoreOptions::for_testing().validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let opts = StoreOptions::new()
            .with_page_size(32 * 1024)
            .with_page_cache_frames(128)
            .with_read_only(true)
            .with_lock_timeout_ms(100);
        assert_eq!(opts.page_size, 32 * 1024);
        assert_eq!(opts.page_cache_frames, 128);
        assert!(opts.read_only);
        assert_eq!(opts.lock_timeout_ms, Some(100));
    }

    #[test]
    fn rejects_odd_page_size() {
        let opts = StoreOptions::new().with_page_size(10_000);
        assert!(matches!(opts.validate(), Err(OptionsError::BadPageSize(_))));
    }

    #[test]
    fn rejects_tiny_cache() {
        let opts = StoreOptions::new().with_page_cache_frames(2);
        assert!(matches!(
            opts.validate(),
            Err(OptionsError::TooFewFrames(2))
        ));
    }

    #[test]
    fn rejects_checkpoint_below_flush() {
        let opts = StoreOptions::new()
            .with_wal_flush_size(1024 * 1024)
            .with_checkpoint_size(1024);
        assert_eq!(opts.validate(), Err(OptionsError::CheckpointBelowFlush));
    }
}
