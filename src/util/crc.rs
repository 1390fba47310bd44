//! CRC32 checksum utilities.
//!
//! Chunk checksums use the standard reflected CRC-32 (IEEE 802.3) as
//! computed by `crc32fast`. The variant is part of the on-disk format:
//! writers and readers must agree, so it is frozen here.

use crc32fast::Hasher;

/// Compute CRC32 checksum of the given data.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute CRC32 checksum of multiple data slices.
pub fn crc32_multi(slices: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for slice in slices {
        hasher.update(slice);
    }
    hasher.finalize()
}
