//! # seglog
//!
//! A segmented, block-aligned write-ahead log.
//!
//! Records are appended to segment files partitioned into 32KB blocks;
//! each record is stored as one or more CRC-protected chunks, and the
//! offset returned at append time reads the record back later. Intended
//! as the durability layer of a key-value store: commit a logical
//! operation by appending its serialized bytes, then replay the log
//! after a crash.
//!
//! ## Features
//!
//! - **Block-aligned chunk format**: large records fragment across
//!   blocks; chunks never straddle a block boundary
//! - **CRC32 integrity**: every chunk is checksummed
//! - **Segment rotation**: a new segment file starts when the active
//!   one reaches its size limit
//! - **Configurable durability**: sync per write, after a byte
//!   threshold, or on a background interval
//! - **Crash recovery**: reopen the directory and replay every record
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seglog::{Options, Wal};
//!
//! # fn main() -> seglog::Result<()> {
//! let wal = Wal::open(Options::new("./wal_data"))?;
//!
//! // Append records; keep the positions for random access.
//! let position = wal.write(b"put k1 v1")?;
//! wal.sync()?;
//!
//! // Read one record back, or replay everything in write order.
//! let record = wal.read_at(position)?;
//! assert_eq!(&record[..], b"put k1 v1");
//!
//! for entry in wal.replay() {
//!     let (_position, _record) = entry?;
//!     // apply to the in-memory state...
//! }
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod segment;
pub mod stats;

// Internal modules
mod util;
mod wal;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, DEFAULT_FILE_EXTENSION, DEFAULT_MAX_SEGMENT_SIZE};
pub use segment::{
    required_space, ChunkType, Segment, SegmentReader, BLOCK_SIZE, HEADER_SIZE,
    MAX_PAYLOAD_PER_CHUNK,
};
pub use stats::{IoStats, IoStatsSnapshot};
pub use wal::{ReplayIter, Wal, WritePosition};
