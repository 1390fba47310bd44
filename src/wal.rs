//! WAL manager: the segment roster and write/sync coordination.
//!
//! A [`Wal`] owns an ordered collection of segments keyed by numeric
//! id. Appends go to the active segment (the greatest id); a new
//! segment is created when the active one cannot fit the next record.
//! Durability follows the configured sync policy: per-write, after a
//! byte threshold, or on a wall-clock interval driven by a background
//! thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::segment::{required_space, Segment, SegmentReader, HEADER_SIZE};
use crate::stats::{IoStats, IoStatsSnapshot};
use crate::util::filename::{create_dir_if_missing, list_segment_files, segment_file_path};
use crate::{Error, Options, Result};

/// Position of a record in the WAL: segment id plus the segment-local
/// offset returned by the append.
///
/// Offsets are local to their segment; callers that address records
/// across segments keep the pair, not the offset alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WritePosition {
    /// Numeric id of the segment holding the record.
    pub segment: u64,
    /// Byte offset of the record's first chunk header.
    pub offset: u64,
}

/// Segment roster. The active segment is the greatest id.
struct Roster {
    segments: BTreeMap<u64, Segment>,
    next_id: u64,
}

impl Roster {
    fn active(&self) -> Option<(u64, &Segment)> {
        self.segments.iter().next_back().map(|(id, seg)| (*id, seg))
    }

    fn active_mut(&mut self) -> Option<(u64, &mut Segment)> {
        self.segments
            .iter_mut()
            .next_back()
            .map(|(id, seg)| (*id, seg))
    }
}

/// State shared with the background sync thread.
struct WalShared {
    options: Options,
    roster: RwLock<Roster>,
    stats: IoStats,
    last_error: Mutex<Option<Error>>,
    /// True once shutdown is requested; guarded by `sync_cv`'s mutex.
    sync_stop: Mutex<bool>,
    sync_cv: Condvar,
}

impl WalShared {
    /// Sync every segment in the roster.
    fn sync_all(&self) -> Result<()> {
        let roster = self.roster.read();
        for segment in roster.segments.values() {
            if let Err(e) = segment.sync() {
                *self.last_error.lock() = Some(e.clone());
                return Err(e);
            }
        }
        self.stats.record_sync();
        Ok(())
    }

    /// Whether the write path should sync before returning.
    fn need_sync(&self) -> bool {
        if self.options.sync_per_write {
            return true;
        }

        let threshold = self.options.sync_bytes_threshold;
        threshold > 0 && self.stats.bytes_since_sync() >= threshold
    }

    /// Background sync loop: wake on the interval (or a shutdown
    /// signal), sync, repeat. Sync failures are logged, not fatal.
    fn sync_loop(&self) {
        let interval = self.options.sync_interval;

        loop {
            {
                let mut stopped = self.sync_stop.lock();
                if *stopped {
                    break;
                }
                self.sync_cv.wait_for(&mut stopped, interval);
                if *stopped {
                    break;
                }
            }

            if let Err(e) = self.sync_all() {
                warn!("background WAL sync failed: {}", e);
            }
        }
    }
}

/// A segmented write-ahead log.
///
/// `write` is exclusive; `sync`, `read_at`, and the stat accessors run
/// under a shared lock. Writes are totally ordered by lock
/// acquisition, and a record is durable once a sync covering it
/// returns successfully.
pub struct Wal {
    shared: Arc<WalShared>,
    sync_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Open a WAL: ensure the directory exists, load every segment
    /// file in it, and start the background sync thread if configured.
    ///
    /// Files whose name is not `<numeric id><extension>` are skipped
    /// with a log note.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;

        create_dir_if_missing(&options.wal_dir).map_err(|e| {
            Error::OpenFailed(format!(
                "failed to create WAL dir {}: {}",
                options.wal_dir.display(),
                e
            ))
        })?;

        let mut skipped = Vec::new();
        let files = list_segment_files(&options.wal_dir, &options.file_extension, &mut skipped)?;
        for path in &skipped {
            info!("skipping non-segment file {}", path.display());
        }

        let mut segments = BTreeMap::new();
        let mut next_id = 0;
        for (id, path) in files {
            let segment = Segment::open(&path)?;
            if options.verbose_logging {
                debug!(
                    "loaded segment {} ({} bytes)",
                    path.display(),
                    segment.size()
                );
            }
            next_id = next_id.max(id);
            segments.insert(id, segment);
        }

        let start_thread = options.sync_interval > Duration::ZERO;
        let shared = Arc::new(WalShared {
            options,
            roster: RwLock::new(Roster { segments, next_id }),
            stats: IoStats::new(),
            last_error: Mutex::new(None),
            sync_stop: Mutex::new(false),
            sync_cv: Condvar::new(),
        });

        let sync_thread = if start_thread {
            let thread_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name("seglog-sync".to_string())
                .spawn(move || thread_shared.sync_loop())
                .map_err(|e| Error::Io(format!("failed to spawn sync thread: {}", e)))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            sync_thread: Mutex::new(sync_thread),
        })
    }

    /// Append a record, returning its position.
    ///
    /// Creates the first segment lazily and rolls over to a new one
    /// when the active segment cannot fit the record's framing.
    /// Records larger than a fresh segment's capacity fail with
    /// `TooLargeData` and leave the WAL untouched.
    pub fn write(&self, record: &[u8]) -> Result<WritePosition> {
        let shared = &*self.shared;
        let max = shared.options.max_segment_size;

        if record.len() as u64 + HEADER_SIZE as u64 > max {
            return Err(Error::TooLargeData {
                size: record.len() + HEADER_SIZE,
                max,
            });
        }

        let mut roster = shared.roster.write();

        let needs_new = match roster.active() {
            None => true,
            Some((_, segment)) => segment.size() + required_space(record.len()) > max,
        };

        if needs_new {
            let id = roster.next_id + 1;
            let path = segment_file_path(&shared.options.wal_dir, id, &shared.options.file_extension);
            let segment = match Segment::open(&path) {
                Ok(s) => s,
                Err(e) => {
                    *shared.last_error.lock() = Some(e.clone());
                    return Err(e);
                }
            };
            if shared.options.verbose_logging {
                debug!("rolled over to segment {}", path.display());
            }
            roster.next_id = id;
            roster.segments.insert(id, segment);
        }

        let (id, segment) = roster
            .active_mut()
            .ok_or_else(|| Error::Io("segment roster unexpectedly empty".to_string()))?;

        let offset = match segment.append(record) {
            Ok(o) => o,
            Err(e) => {
                *shared.last_error.lock() = Some(e.clone());
                return Err(e);
            }
        };

        shared.stats.record_write(record.len() as u64);

        if shared.need_sync() {
            if let Err(e) = segment.sync() {
                *shared.last_error.lock() = Some(e.clone());
                return Err(e);
            }
            shared.stats.record_sync();
        }

        Ok(WritePosition {
            segment: id,
            offset,
        })
    }

    /// Sync every segment to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.shared.sync_all()
    }

    /// Read back the record at `position`.
    pub fn read_at(&self, position: WritePosition) -> Result<Bytes> {
        let roster = self.shared.roster.read();
        let segment = roster
            .segments
            .get(&position.segment)
            .ok_or(Error::SegmentNotFound(position.segment))?;
        segment.read_at(position.offset)
    }

    /// Iterate every record in the WAL, segments in id order.
    ///
    /// Replay reads through fresh file handles, so it sees what has
    /// reached the filesystem; positions yielded equal the positions
    /// `write` returned.
    pub fn replay(&self) -> ReplayIter {
        let roster = self.shared.roster.read();
        let segments: Vec<(u64, PathBuf)> = roster
            .segments
            .iter()
            .map(|(id, segment)| (*id, segment.path().to_path_buf()))
            .collect();

        ReplayIter {
            segments: segments.into_iter(),
            current: None,
        }
    }

    /// Snapshot of the running I/O counters.
    pub fn stats(&self) -> IoStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The most recent write or sync error, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().clone()
    }

    /// Number of segments in the roster.
    pub fn segment_count(&self) -> usize {
        self.shared.roster.read().segments.len()
    }

    /// Id of the active segment, if any segment exists yet.
    pub fn active_segment_id(&self) -> Option<u64> {
        self.shared.roster.read().active().map(|(id, _)| id)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        {
            let mut stopped = self.shared.sync_stop.lock();
            *stopped = true;
            self.shared.sync_cv.notify_all();
        }

        if let Some(handle) = self.sync_thread.lock().take() {
            let _ = handle.join();
        }

        // Segments sync best-effort and close in their own Drop.
    }
}

/// Iterator over every record in the WAL, in write order.
pub struct ReplayIter {
    segments: std::vec::IntoIter<(u64, PathBuf)>,
    current: Option<(u64, SegmentReader)>,
}

impl Iterator for ReplayIter {
    type Item = Result<(WritePosition, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let (id, path) = self.segments.next()?;
                match SegmentReader::open(&path) {
                    Ok(reader) => self.current = Some((id, reader)),
                    Err(e) => return Some(Err(e)),
                }
            }

            let (id, reader) = self.current.as_mut()?;
            match reader.read_record() {
                Ok(Some((offset, record))) => {
                    let position = WritePosition {
                        segment: *id,
                        offset,
                    };
                    return Some(Ok((position, record)));
                }
                Ok(None) => {
                    self.current = None;
                }
                Err(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BLOCK_SIZE;
    use tempfile::tempdir;

    fn small_wal_options(dir: &std::path::Path, max_segment_size: u64) -> Options {
        let mut options = Options::new(dir);
        options.max_segment_size = max_segment_size;
        options
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("nested/wal");

        let wal = Wal::open(Options::new(&wal_dir)).unwrap();
        assert!(wal_dir.is_dir());
        assert_eq!(wal.segment_count(), 0);
    }

    #[test]
    fn test_first_write_creates_segment() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(Options::new(dir.path())).unwrap();

        let position = wal.write(b"hello").unwrap();
        assert_eq!(position, WritePosition { segment: 1, offset: 0 });
        assert_eq!(wal.segment_count(), 1);
        assert!(dir.path().join("1.seg").is_file());

        assert_eq!(&wal.read_at(position).unwrap()[..], b"hello");
    }

    #[test]
    fn test_write_read_many() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(Options::new(dir.path())).unwrap();

        let mut positions = Vec::new();
        for i in 0..1000usize {
            let data = format!("record number {}", i);
            positions.push((wal.write(data.as_bytes()).unwrap(), data));
        }

        for (position, data) in positions {
            assert_eq!(&wal.read_at(position).unwrap()[..], data.as_bytes());
        }
    }

    #[test]
    fn test_rollover_across_segments() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(small_wal_options(dir.path(), 1024 * 1024)).unwrap();

        // 2MB of data in 64KB records forces at least one rollover.
        let record = vec![b'r'; 64 * 1024];
        let mut positions = Vec::new();
        for _ in 0..32 {
            positions.push(wal.write(&record).unwrap());
        }

        assert!(wal.segment_count() >= 2);

        for position in &positions {
            assert_eq!(&wal.read_at(*position).unwrap()[..], &record[..]);
        }

        // Every segment stayed within one record's framing of the cap.
        let roster = wal.shared.roster.read();
        for segment in roster.segments.values() {
            assert!(segment.size() <= 1024 * 1024 + required_space(record.len()));
        }
    }

    #[test]
    fn test_too_large_record_rejected() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(small_wal_options(dir.path(), 64 * 1024)).unwrap();

        let err = wal.write(&vec![b'x'; 65_530]).unwrap_err();
        assert!(matches!(err, Error::TooLargeData { .. }));

        // Nothing was created or counted.
        assert_eq!(wal.segment_count(), 0);
        assert_eq!(wal.stats().total_write_ops, 0);

        // A fitting record still works afterwards.
        wal.write(b"small").unwrap();
        assert_eq!(wal.stats().total_write_ops, 1);
    }

    #[test]
    fn test_io_stats_accounting() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(Options::new(dir.path())).unwrap();

        let sizes = [5usize, 0, 4096, 100];
        for size in sizes {
            wal.write(&vec![b's'; size]).unwrap();
        }

        let snap = wal.stats();
        assert_eq!(snap.total_write_ops, sizes.len() as u64);
        assert_eq!(
            snap.total_bytes_written,
            sizes.iter().map(|s| *s as u64).sum::<u64>()
        );
        assert_eq!(snap.bytes_since_sync, snap.total_bytes_written);
        assert_eq!(snap.sync_ops, 0);

        wal.sync().unwrap();
        let snap = wal.stats();
        assert_eq!(snap.sync_ops, 1);
        assert_eq!(snap.bytes_since_sync, 0);
        assert_eq!(snap.ops_since_sync, 0);
    }

    #[test]
    fn test_sync_per_write() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.sync_per_write = true;
        let wal = Wal::open(options).unwrap();

        wal.write(b"one").unwrap();
        wal.write(b"two").unwrap();

        let snap = wal.stats();
        assert_eq!(snap.sync_ops, 2);
        assert_eq!(snap.bytes_since_sync, 0);
    }

    #[test]
    fn test_sync_bytes_threshold() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.sync_bytes_threshold = 1000;
        let wal = Wal::open(options).unwrap();

        wal.write(&[b'a'; 400]).unwrap();
        wal.write(&[b'b'; 400]).unwrap();
        assert_eq!(wal.stats().sync_ops, 0);
        assert_eq!(wal.stats().bytes_since_sync, 800);

        // Crossing the threshold syncs and resets the counter.
        wal.write(&[b'c'; 400]).unwrap();
        let snap = wal.stats();
        assert_eq!(snap.sync_ops, 1);
        assert_eq!(snap.bytes_since_sync, 0);
    }

    #[test]
    fn test_background_sync() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.sync_interval = Duration::from_millis(20);
        let wal = Wal::open(options).unwrap();

        wal.write(b"beat").unwrap();

        // Give the background thread a few periods to fire.
        std::thread::sleep(Duration::from_millis(200));
        assert!(wal.stats().sync_ops >= 1);
    }

    #[test]
    fn test_drop_joins_background_thread() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.sync_interval = Duration::from_secs(3600);
        let wal = Wal::open(options).unwrap();
        wal.write(b"pending").unwrap();

        // Drop must wake the parked thread and return promptly rather
        // than waiting out the hour-long interval.
        let started = std::time::Instant::now();
        drop(wal);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_numeric_roster_ordering() {
        let dir = tempdir().unwrap();
        for id in 1..=10u64 {
            std::fs::write(dir.path().join(format!("{}.seg", id)), "").unwrap();
        }

        let wal = Wal::open(Options::new(dir.path())).unwrap();
        assert_eq!(wal.segment_count(), 10);
        // "10.seg" sorts before "2.seg" as a string; numerically it is
        // the active segment.
        assert_eq!(wal.active_segment_id(), Some(10));

        let position = wal.write(b"goes to ten").unwrap();
        assert_eq!(position.segment, 10);
    }

    #[test]
    fn test_non_segment_files_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "notes").unwrap();
        std::fs::write(dir.path().join("3.seg.bak"), "").unwrap();

        let wal = Wal::open(Options::new(dir.path())).unwrap();
        assert_eq!(wal.segment_count(), 0);

        let position = wal.write(b"fresh").unwrap();
        assert_eq!(position.segment, 1);
    }

    #[test]
    fn test_reopen_resumes_roster() {
        let dir = tempdir().unwrap();

        let mut positions = Vec::new();
        {
            let wal = Wal::open(small_wal_options(dir.path(), BLOCK_SIZE as u64)).unwrap();
            for i in 0..4usize {
                // Each record nearly fills a segment, forcing rollover.
                let record = vec![b'0' + i as u8; BLOCK_SIZE - 64];
                positions.push((wal.write(&record).unwrap(), record));
            }
            wal.sync().unwrap();
            assert_eq!(wal.segment_count(), 4);
        }

        let wal = Wal::open(small_wal_options(dir.path(), BLOCK_SIZE as u64)).unwrap();
        assert_eq!(wal.segment_count(), 4);
        assert_eq!(wal.active_segment_id(), Some(4));

        // Old records are still addressable.
        for (position, record) in &positions {
            assert_eq!(&wal.read_at(*position).unwrap()[..], &record[..]);
        }

        // New writes roll into segment 5, not back over segment 1.
        let position = wal.write(&vec![b'n'; BLOCK_SIZE - 64]).unwrap();
        assert_eq!(position.segment, 5);
    }

    #[test]
    fn test_replay_yields_all_records_in_order() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(small_wal_options(dir.path(), 64 * 1024)).unwrap();

        let mut expected = Vec::new();
        for i in 0..200usize {
            let data = format!("replayable {}", i).into_bytes();
            let position = wal.write(&data).unwrap();
            expected.push((position, data));
        }
        wal.sync().unwrap();
        assert!(wal.segment_count() >= 2);

        let replayed: Vec<_> = wal.replay().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(replayed.len(), expected.len());
        for ((position, data), (replay_position, replay_data)) in
            expected.iter().zip(replayed.iter())
        {
            assert_eq!(position, replay_position);
            assert_eq!(&data[..], &replay_data[..]);
        }
    }

    #[test]
    fn test_unknown_segment_read() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(Options::new(dir.path())).unwrap();
        wal.write(b"only segment one").unwrap();

        let err = wal
            .read_at(WritePosition {
                segment: 99,
                offset: 0,
            })
            .unwrap_err();
        assert!(matches!(err, Error::SegmentNotFound(99)));
    }

    #[test]
    fn test_concurrent_writers() {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::open(small_wal_options(dir.path(), 256 * 1024)).unwrap());

        let threads = 4;
        let writes_per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let wal = Arc::clone(&wal);
                std::thread::spawn(move || {
                    let mut written = Vec::new();
                    for i in 0..writes_per_thread {
                        let data = format!("thread {} record {}", t, i).into_bytes();
                        let position = wal.write(&data).unwrap();
                        written.push((position, data));
                    }
                    written
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        assert_eq!(
            wal.stats().total_write_ops,
            (threads * writes_per_thread) as u64
        );

        for (position, data) in all {
            assert_eq!(&wal.read_at(position).unwrap()[..], &data[..]);
        }
    }
}
