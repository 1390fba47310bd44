//! Error types for seglog.

use std::io;
use thiserror::Error;

/// Result type alias for seglog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for WAL operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Record cannot fit in a segment, even a fresh one.
    #[error("record too large: {size} bytes (segment capacity: {max})")]
    TooLargeData {
        /// Record length plus chunk-header overhead.
        size: usize,
        /// Configured maximum segment size.
        max: u64,
    },

    /// Filesystem refused to open or create a segment file.
    #[error("failed to open segment file: {0}")]
    OpenFailed(String),

    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Read offset outside the segment's written range, or not at the
    /// start of a record.
    #[error("invalid read offset: {0}")]
    InvalidOffset(u64),

    /// No segment with the given id exists in the roster.
    #[error("no such segment: {0}")]
    SegmentNotFound(u64),

    /// Operation on a closed segment.
    #[error("segment is closed")]
    Closed,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Check if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::CrcMismatch { .. })
    }
}
