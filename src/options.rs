//! Configuration options for the WAL.

use std::path::PathBuf;
use std::time::Duration;

/// Default segment file extension, including the leading dot.
pub const DEFAULT_FILE_EXTENSION: &str = ".seg";

/// Default maximum segment size (64MB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// WAL configuration options.
///
/// Only `wal_dir` is required; everything else has a conservative
/// default. The three sync knobs compose: `sync_per_write` forces a
/// sync inside every [`Wal::write`](crate::Wal::write),
/// `sync_bytes_threshold` triggers one after enough unsynced bytes
/// accumulate, and `sync_interval` drives a background thread that
/// syncs on a wall-clock period. A zero threshold or interval disables
/// that policy.
#[derive(Debug, Clone)]
pub struct Options {
    /// Base path where segment files are written and loaded from.
    pub wal_dir: PathBuf,

    /// Segment filename extension, including the leading dot.
    pub file_extension: String,

    /// Upper bound on a single segment file's size, in bytes.
    ///
    /// A segment may exceed this by less than one record's framing
    /// overhead; rollover happens before the append that would not fit.
    pub max_segment_size: u64,

    /// Bytes written since the last sync that trigger a sync inside
    /// `write`. Zero disables the threshold.
    pub sync_bytes_threshold: u64,

    /// Wall-clock period of the background sync thread. Zero disables
    /// it.
    pub sync_interval: Duration,

    /// Sync before every `write` returns.
    pub sync_per_write: bool,

    /// Advisory: sealed segments may be compressed by an external
    /// process. Core behavior is unchanged.
    pub compression_enabled: bool,

    /// Advisory: emit debug-level notes about padding, rollover, and
    /// directory scanning.
    pub verbose_logging: bool,
}

impl Options {
    /// Create options for the given WAL directory with defaults for
    /// everything else.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            sync_bytes_threshold: 0,
            sync_interval: Duration::ZERO,
            sync_per_write: false,
            compression_enabled: false,
            verbose_logging: false,
        }
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_segment_size == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "max_segment_size must be non-zero".into(),
            ));
        }

        if !self.file_extension.starts_with('.') || self.file_extension.len() < 2 {
            return Err(crate::Error::InvalidConfiguration(format!(
                "file_extension must start with '.' and name an extension, got {:?}",
                self.file_extension
            )));
        }

        Ok(())
    }
}

/// Builder for [`Options`].
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder for the given WAL directory.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            options: Options::new(wal_dir),
        }
    }

    /// Set the segment file extension (must include the leading dot).
    pub fn file_extension(mut self, ext: impl Into<String>) -> Self {
        self.options.file_extension = ext.into();
        self
    }

    /// Set the maximum segment size in bytes.
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.options.max_segment_size = size;
        self
    }

    /// Set the byte threshold that triggers a sync inside `write`.
    pub fn sync_bytes_threshold(mut self, bytes: u64) -> Self {
        self.options.sync_bytes_threshold = bytes;
        self
    }

    /// Set the background sync interval.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.options.sync_interval = interval;
        self
    }

    /// Set whether every write syncs before returning.
    pub fn sync_per_write(mut self, value: bool) -> Self {
        self.options.sync_per_write = value;
        self
    }

    /// Set the advisory compression flag.
    pub fn compression_enabled(mut self, value: bool) -> Self {
        self.options.compression_enabled = value;
        self
    }

    /// Set the advisory verbose-logging flag.
    pub fn verbose_logging(mut self, value: bool) -> Self {
        self.options.verbose_logging = value;
        self
    }

    /// Build the options, validating them.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
