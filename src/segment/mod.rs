//! Segment files: the on-disk chunked record format.
//!
//! A segment is an append-only file partitioned into 32KB blocks. Each
//! record is stored as one or more chunks, and a chunk never straddles
//! a block boundary. Each chunk carries:
//! - CRC32 checksum (4 bytes)
//! - Payload length (2 bytes)
//! - Chunk type (1 byte): FULL, FIRST, MIDDLE, LAST
//! - Payload (variable)
//!
//! Records that don't fit in the current block are fragmented across
//! blocks using FIRST, MIDDLE, and LAST chunks. When fewer than 8 bytes
//! remain in a block after a chunk, the remainder is zero-filled and
//! the next chunk starts in the next block, so a chunk header never
//! sits in a block's final 7 bytes.
//!
//! `append` returns the file offset of the record's first chunk header;
//! `read_at` reconstructs the record from that offset. All multi-byte
//! header fields are little-endian.

mod reader;

pub use reader::{RecordIter, SegmentReader};

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::util::crc::crc32_multi;
use crate::{Error, Result};

/// Block size (32KB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Chunk header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Maximum payload size of a single chunk.
pub const MAX_PAYLOAD_PER_CHUNK: usize = BLOCK_SIZE - HEADER_SIZE;

/// Chunk types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// Complete record in a single chunk.
    Full = 0,
    /// First chunk of a fragmented record.
    First = 1,
    /// Middle chunk(s) of a fragmented record.
    Middle = 2,
    /// Last chunk of a fragmented record.
    Last = 3,
}

impl ChunkType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChunkType::Full),
            1 => Some(ChunkType::First),
            2 => Some(ChunkType::Middle),
            3 => Some(ChunkType::Last),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Bytes a record of `len` payload bytes adds to a segment when
/// appended at a block-aligned offset, excluding any padding the
/// append's own tail may trigger.
///
/// The WAL uses this to decide rollover before calling
/// [`Segment::append`].
pub fn required_space(len: usize) -> u64 {
    if len == 0 {
        // An empty record still costs one empty FULL chunk.
        return HEADER_SIZE as u64;
    }

    let full_chunks = (len / MAX_PAYLOAD_PER_CHUNK) as u64;
    let tail = (len % MAX_PAYLOAD_PER_CHUNK) as u64;

    let mut space = full_chunks * BLOCK_SIZE as u64 + tail;
    if tail != 0 {
        space += HEADER_SIZE as u64;
    }
    space
}

/// Skip the caller's offset past a block's padding tail.
///
/// Offsets handed to `read_at` may land in the final 7 bytes of a block
/// when the append that produced them triggered padding; the chunk they
/// name starts in the next block.
fn align_for_read(offset: u64) -> u64 {
    let remain = BLOCK_SIZE as u64 - offset % BLOCK_SIZE as u64;
    if remain <= HEADER_SIZE as u64 {
        offset + remain
    } else {
        offset
    }
}

/// Encode one chunk (header + payload) into `buf`.
fn emit_chunk(buf: &mut Vec<u8>, chunk_type: ChunkType, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PAYLOAD_PER_CHUNK);

    let mut header = [0u8; HEADER_SIZE];
    header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    header[6] = chunk_type.to_byte();

    // CRC covers len, type, and payload; the CRC field itself is excluded.
    let crc = crc32_multi(&[&header[4..7], payload]);
    header[0..4].copy_from_slice(&crc.to_le_bytes());

    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
}

/// Lay out a record as a chunk stream starting at file position `start`.
///
/// Returns the complete byte buffer to append, including any block
/// padding, so the caller can issue a single write.
fn encode_record(start: u64, record: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(required_space(record.len()) as usize + HEADER_SIZE);
    let mut pos = start;
    let mut remaining = record;
    let mut first = true;

    loop {
        let mut block_remain = (BLOCK_SIZE as u64 - pos % BLOCK_SIZE as u64) as usize;
        if block_remain <= HEADER_SIZE {
            // Can only happen when reopening a file whose tail padding
            // was torn off; restore the invariant before writing.
            buf.resize(buf.len() + block_remain, 0);
            pos += block_remain as u64;
            block_remain = BLOCK_SIZE;
        }

        let avail = block_remain - HEADER_SIZE;
        let take = remaining.len().min(avail);
        let (payload, rest) = remaining.split_at(take);

        let chunk_type = match (first, rest.is_empty()) {
            (true, true) => ChunkType::Full,
            (true, false) => ChunkType::First,
            (false, true) => ChunkType::Last,
            (false, false) => ChunkType::Middle,
        };

        emit_chunk(&mut buf, chunk_type, payload);
        pos += (HEADER_SIZE + take) as u64;

        let tail = BLOCK_SIZE as u64 - pos % BLOCK_SIZE as u64;
        if tail <= HEADER_SIZE as u64 {
            buf.resize(buf.len() + tail as usize, 0);
            pos += tail;
        }

        if rest.is_empty() {
            return buf;
        }
        remaining = rest;
        first = false;
    }
}

/// One segment file: an append-only chunked record store.
///
/// A segment is single-writer; the WAL serializes appends under its
/// write lock. Reads are positional and take `&self`, so they may run
/// concurrently with each other under the WAL's shared lock.
pub struct Segment {
    /// Open handle; `None` once the segment is closed.
    file: Option<File>,
    /// Path the segment was opened with.
    path: PathBuf,
    /// Next append position. Always equals the file's size.
    next_offset: u64,
    /// Monotonic: set by `close`, never cleared.
    closed: bool,
}

impl Segment {
    /// Open a segment file, creating it if missing.
    ///
    /// Existing files are opened for appending: the write offset picks
    /// up at the current end of file, so a reopened segment's records
    /// stay addressable at their original offsets.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::OpenFailed(format!("{}: {}", path.display(), e)))?;

        let size = file
            .metadata()
            .map_err(|e| Error::OpenFailed(format!("{}: {}", path.display(), e)))?
            .len();

        Ok(Self {
            file: Some(file),
            path,
            next_offset: size,
            closed: false,
        })
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::Closed)
    }

    /// Append a record, returning the file offset of its first chunk
    /// header.
    ///
    /// The entire chunk stream (including padding) is written in a
    /// single call; on failure the write offset is left unchanged, so a
    /// failed append never advances the segment's logical end.
    pub fn append(&mut self, record: &[u8]) -> Result<u64> {
        let mut file = self.file()?;

        let start = self.next_offset;
        let buf = encode_record(start, record);

        file.write_all(&buf)?;

        self.next_offset += buf.len() as u64;
        Ok(start)
    }

    /// Read back the record whose first chunk starts at `offset`.
    ///
    /// `offset` must have been returned by a prior `append` on this
    /// segment (or the same file before a reopen). Offsets that don't
    /// name the start of a record fail with `InvalidOffset`; damaged
    /// chunks fail with `Corruption` or `CrcMismatch`.
    pub fn read_at(&self, offset: u64) -> Result<Bytes> {
        let file = self.file()?;

        let mut pos = align_for_read(offset);
        let mut scratch = Vec::new();
        let mut in_fragmented = false;

        loop {
            if pos + HEADER_SIZE as u64 > self.next_offset {
                return Err(Error::InvalidOffset(offset));
            }

            let mut header = [0u8; HEADER_SIZE];
            file.read_exact_at(&mut header, pos)?;

            let expected_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let len = u16::from_le_bytes([header[4], header[5]]) as usize;
            let chunk_type = ChunkType::from_byte(header[6]).ok_or_else(|| {
                Error::corruption(format!("invalid chunk type {} at offset {}", header[6], pos))
            })?;

            let block_remain = BLOCK_SIZE as u64 - pos % BLOCK_SIZE as u64;
            if (HEADER_SIZE + len) as u64 > block_remain {
                return Err(Error::corruption(format!(
                    "chunk at offset {} straddles a block boundary",
                    pos
                )));
            }
            if pos + (HEADER_SIZE + len) as u64 > self.next_offset {
                return Err(Error::corruption(format!(
                    "chunk at offset {} extends past the end of the segment",
                    pos
                )));
            }

            // Payload lands straight in the result buffer.
            let data_start = scratch.len();
            scratch.resize(data_start + len, 0);
            file.read_exact_at(&mut scratch[data_start..], pos + HEADER_SIZE as u64)?;

            let actual_crc = crc32_multi(&[&header[4..7], &scratch[data_start..]]);
            if actual_crc != expected_crc {
                return Err(Error::CrcMismatch {
                    expected: expected_crc,
                    actual: actual_crc,
                });
            }

            match (chunk_type, in_fragmented) {
                (ChunkType::Full, false) => return Ok(Bytes::from(scratch)),
                (ChunkType::First, false) => in_fragmented = true,
                (ChunkType::Middle, true) => {}
                (ChunkType::Last, true) => return Ok(Bytes::from(scratch)),
                // The offset names a middle of some record, not a start.
                (_, false) => return Err(Error::InvalidOffset(offset)),
                (t, true) => {
                    return Err(Error::corruption(format!(
                        "unexpected {:?} chunk at offset {} inside a fragmented record",
                        t, pos
                    )))
                }
            }

            pos = align_for_read(pos + (HEADER_SIZE + len) as u64);
        }
    }

    /// Flush buffered data to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.file()?.sync_data()?;
        Ok(())
    }

    /// Sync best-effort, then close the file handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.sync_data();
        }
        self.closed = true;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the file handle is open.
    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    /// Current segment size in bytes.
    pub fn size(&self) -> u64 {
        self.next_offset
    }

    /// Path the segment was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.close();
    }
}
