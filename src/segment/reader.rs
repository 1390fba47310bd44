//! Sequential segment scanning for replay.
//!
//! A [`SegmentReader`] walks one segment file start-to-end, verifying
//! CRCs, reassembling fragmented records, and skipping block padding.
//! A torn tail (a record whose final chunks never made it to disk)
//! ends the scan cleanly rather than erroring, since that is the
//! expected shape of a crash mid-append.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;

use crate::util::crc::crc32_multi;
use crate::{Error, Result};

use super::{ChunkType, BLOCK_SIZE, HEADER_SIZE};

/// Reads records sequentially from a segment file.
pub struct SegmentReader {
    /// Buffered reader for the segment file.
    reader: BufReader<File>,
    /// Current block buffer.
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    /// Blocks consumed so far, including the one in the buffer.
    blocks_read: u64,
    /// Whether we've reached EOF.
    eof: bool,
}

impl SegmentReader {
    /// Open a segment file for sequential reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::OpenFailed(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE * 4, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            blocks_read: 0,
            eof: false,
        })
    }

    /// Read the next record.
    ///
    /// Returns the record's start offset (the value `append` returned
    /// for it) together with its payload, or `None` at end of file.
    pub fn read_record(&mut self) -> Result<Option<(u64, Bytes)>> {
        let mut scratch = Vec::new();
        let mut record_offset = 0u64;
        let mut in_fragmented = false;

        loop {
            match self.read_physical_chunk()? {
                Some((offset, chunk_type, data)) => match (chunk_type, in_fragmented) {
                    (ChunkType::Full, false) => {
                        return Ok(Some((offset, Bytes::from(data))));
                    }
                    (ChunkType::First, false) => {
                        record_offset = offset;
                        scratch = data;
                        in_fragmented = true;
                    }
                    (ChunkType::Middle, true) => {
                        scratch.extend_from_slice(&data);
                    }
                    (ChunkType::Last, true) => {
                        scratch.extend_from_slice(&data);
                        return Ok(Some((record_offset, Bytes::from(scratch))));
                    }
                    (t, _) => {
                        return Err(Error::corruption(format!(
                            "unexpected {:?} chunk at offset {}",
                            t, offset
                        )));
                    }
                },
                None => {
                    // A dangling FIRST/MIDDLE prefix is a torn tail;
                    // the record was never durably completed.
                    return Ok(None);
                }
            }
        }
    }

    /// Read the next chunk, skipping block-tail padding.
    fn read_physical_chunk(&mut self) -> Result<Option<(u64, ChunkType, Vec<u8>)>> {
        loop {
            // No room for a header: block-tail padding or block end.
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];
            let expected_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let len = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            let offset = (self.blocks_read - 1) * BLOCK_SIZE as u64 + self.buffer_offset as u64;

            let chunk_type = ChunkType::from_byte(type_byte).ok_or_else(|| {
                Error::corruption(format!(
                    "invalid chunk type {} at offset {}",
                    type_byte, offset
                ))
            })?;

            if self.buffer_offset + HEADER_SIZE + len > self.buffer_size {
                if self.eof {
                    // Truncated chunk at end of file.
                    return Ok(None);
                }
                return Err(Error::corruption(format!(
                    "chunk at offset {} extends beyond its block",
                    offset
                )));
            }

            let data_start = self.buffer_offset + HEADER_SIZE;
            let data = &self.buffer[data_start..data_start + len];

            let actual_crc = crc32_multi(&[&header[4..7], data]);
            if actual_crc != expected_crc {
                return Err(Error::CrcMismatch {
                    expected: expected_crc,
                    actual: actual_crc,
                });
            }

            let data = data.to_vec();
            self.buffer_offset += HEADER_SIZE + len;

            return Ok(Some((offset, chunk_type, data)));
        }
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        self.buffer_size = 0;

        while self.buffer_size < BLOCK_SIZE {
            let n = self.reader.read(&mut self.buffer[self.buffer_size..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buffer_size += n;
        }

        if self.buffer_size == 0 {
            return Ok(false);
        }

        self.blocks_read += 1;
        Ok(true)
    }

    /// Iterate over the remaining records.
    pub fn records(&mut self) -> RecordIter<'_> {
        RecordIter { reader: self }
    }
}

/// Iterator over a segment's records.
pub struct RecordIter<'a> {
    reader: &'a mut SegmentReader,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<(u64, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
