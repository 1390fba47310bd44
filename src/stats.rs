//! Running I/O counters for the WAL.
//!
//! Counters are mutated under the WAL write lock but use relaxed
//! atomics so shared-lock holders (readers, the background sync
//! thread) can take consistent-enough snapshots without upgrading.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running I/O statistics for a [`Wal`](crate::Wal).
#[derive(Debug, Default)]
pub struct IoStats {
    total_bytes_written: AtomicU64,
    total_write_ops: AtomicU64,
    bytes_since_sync: AtomicU64,
    ops_since_sync: AtomicU64,
    sync_ops: AtomicU64,
}

impl IoStats {
    /// Create fresh stats with all counters at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one appended record of `nbytes` payload bytes.
    pub fn record_write(&self, nbytes: u64) {
        self.total_bytes_written.fetch_add(nbytes, Ordering::Relaxed);
        self.total_write_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_since_sync.fetch_add(nbytes, Ordering::Relaxed);
        self.ops_since_sync.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for one sync, resetting the since-last-sync counters.
    pub fn record_sync(&self) {
        self.sync_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_since_sync.store(0, Ordering::Relaxed);
        self.ops_since_sync.store(0, Ordering::Relaxed);
    }

    /// Payload bytes appended since the last sync. Drives the
    /// byte-threshold sync policy.
    pub fn bytes_since_sync(&self) -> u64 {
        self.bytes_since_sync.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_write_ops: self.total_write_ops.load(Ordering::Relaxed),
            bytes_since_sync: self.bytes_since_sync.load(Ordering::Relaxed),
            ops_since_sync: self.ops_since_sync.load(Ordering::Relaxed),
            sync_ops: self.sync_ops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub total_bytes_written: u64,
    pub total_write_ops: u64,
    pub bytes_since_sync: u64,
    pub ops_since_sync: u64,
    pub sync_ops: u64,
}
