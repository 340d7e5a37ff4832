//! A single segment triple: `<base>.log`, `<base>.index`, `<base>.timeindex`.
//!
//! Exactly one segment per partition is active (appendable); the rest are
//! sealed and immutable. See spec §4.1 for the on-disk layout and the
//! recovery-on-open contract.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::batch::{self, BATCH_HEADER_LEN};

const INDEX_ENTRY_LEN: u64 = 8; // (relOffset: u32, fileOffset: u32)
const TIMEINDEX_ENTRY_LEN: u64 = 12; // (timestampMs: i64, relOffset: u32)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub rel_offset: u32,
    pub file_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndexEntry {
    pub timestamp_ms: i64,
    pub rel_offset: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("segment {0} is sealed and cannot be appended to")]
    Sealed(i64),
}

/// One `(base.log, base.index, base.timeindex)` triple for a partition.
pub struct Segment {
    base_offset: i64,
    log_path: PathBuf,
    log_file: File,
    index_file: Mutex<File>,
    timeindex_file: Mutex<File>,

    size: AtomicU64,
    last_offset: AtomicI64,
    last_batch_max_timestamp: AtomicI64,
    created_at_ms: i64,
    sealed: AtomicBool,

    index: RwLock<Vec<IndexEntry>>,
    timeindex: RwLock<Vec<TimeIndexEntry>>,
    /// Bytes appended since the last index entry; used to honor `indexIntervalBytes`.
    bytes_since_index: AtomicU64,

    append_lock: Mutex<()>,
}

fn segment_stem(base_offset: i64) -> String {
    format!("{base_offset:020}")
}

pub fn log_path(dir: &Path, base_offset: i64) -> PathBuf {
    dir.join(format!("{}.log", segment_stem(base_offset)))
}

pub fn index_path(dir: &Path, base_offset: i64) -> PathBuf {
    dir.join(format!("{}.index", segment_stem(base_offset)))
}

pub fn timeindex_path(dir: &Path, base_offset: i64) -> PathBuf {
    dir.join(format!("{}.timeindex", segment_stem(base_offset)))
}

impl Segment {
    /// Create a brand new, empty active segment.
    pub fn create(dir: &Path, base_offset: i64, now_ms: i64) -> Result<Self, SegmentError> {
        let log_path = log_path(dir, base_offset);
        let log_file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&log_path)?;
        let index_file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(index_path(dir, base_offset))?;
        let timeindex_file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(timeindex_path(dir, base_offset))?;

        Ok(Self {
            base_offset,
            log_path,
            log_file,
            index_file: Mutex::new(index_file),
            timeindex_file: Mutex::new(timeindex_file),
            size: AtomicU64::new(0),
            last_offset: AtomicI64::new(base_offset - 1),
            last_batch_max_timestamp: AtomicI64::new(now_ms),
            created_at_ms: now_ms,
            sealed: AtomicBool::new(false),
            index: RwLock::new(Vec::new()),
            timeindex: RwLock::new(Vec::new()),
            bytes_since_index: AtomicU64::new(0),
            append_lock: Mutex::new(()),
        })
    }

    /// Open an already-sealed segment, trusting its indexes unless they are
    /// missing, short, or internally inconsistent (spec §4.1 recovery rules).
    pub fn open_sealed(dir: &Path, base_offset: i64, created_at_ms: i64) -> Result<Self, SegmentError> {
        let log_path = log_path(dir, base_offset);
        let log_file = OpenOptions::new().read(true).write(true).open(&log_path)?;
        let size = log_file.metadata()?.len();

        let index_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(index_path(dir, base_offset))?;
        let timeindex_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(timeindex_path(dir, base_offset))?;

        let mut index = read_index_entries(&index_file)?;
        let mut timeindex = read_timeindex_entries(&timeindex_file)?;

        let (last_offset, last_max_ts, consistent) =
            scan_for_last_offset_and_timestamp(&log_file, size)?;

        if !consistent || !index_is_consistent(&index, size) {
            tracing::warn!(base_offset, "rebuilding inconsistent index for sealed segment");
            let (rebuilt_index, rebuilt_timeindex) = rebuild_indexes(&log_file, size)?;
            index = rebuilt_index;
            timeindex = rebuilt_timeindex;
            persist_index(&index_file, &index)?;
            persist_timeindex(&timeindex_file, &timeindex)?;
        }

        Ok(Self {
            base_offset,
            log_path,
            log_file,
            index_file: Mutex::new(index_file),
            timeindex_file: Mutex::new(timeindex_file),
            size: AtomicU64::new(size),
            last_offset: AtomicI64::new(last_offset),
            last_batch_max_timestamp: AtomicI64::new(last_max_ts),
            created_at_ms,
            sealed: AtomicBool::new(true),
            index: RwLock::new(index),
            timeindex: RwLock::new(timeindex),
            bytes_since_index: AtomicU64::new(0),
            append_lock: Mutex::new(()),
        })
    }

    /// Open the highest-offset segment as active, forward-scanning the full
    /// log and truncating at the first torn or corrupt batch. Indexes are
    /// always rebuilt from scratch for the active segment.
    /// Returns the recovered segment plus the number of bytes discarded
    /// from the tail of a torn or corrupt write, if any (0 when the
    /// segment was already fully consistent).
    pub fn open_active_recover(
        dir: &Path,
        base_offset: i64,
        created_at_ms: i64,
    ) -> Result<(Self, u64), SegmentError> {
        let log_path = log_path(dir, base_offset);
        let log_file = OpenOptions::new().read(true).write(true).open(&log_path)?;
        let declared_size = log_file.metadata()?.len();

        let (valid_size, last_offset, last_max_ts, index, timeindex) =
            recover_active(&log_file, declared_size, base_offset)?;

        let discarded = declared_size - valid_size;
        if discarded > 0 {
            tracing::warn!(
                base_offset,
                declared_size,
                valid_size,
                "truncating active segment at first torn/corrupt batch"
            );
            log_file.set_len(valid_size)?;
        }

        let index_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(index_path(dir, base_offset))?;
        let timeindex_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(timeindex_path(dir, base_offset))?;
        persist_index(&index_file, &index)?;
        persist_timeindex(&timeindex_file, &timeindex)?;

        Ok((
            Self {
                base_offset,
                log_path,
                log_file,
                index_file: Mutex::new(index_file),
                timeindex_file: Mutex::new(timeindex_file),
                size: AtomicU64::new(valid_size),
                last_offset: AtomicI64::new(last_offset),
                last_batch_max_timestamp: AtomicI64::new(last_max_ts),
                created_at_ms,
                sealed: AtomicBool::new(false),
                index: RwLock::new(index),
                timeindex: RwLock::new(timeindex),
                bytes_since_index: AtomicU64::new(0),
                append_lock: Mutex::new(()),
            },
            discarded,
        ))
    }

    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    /// Path of the underlying `.log` file, for callers that want to open
    /// their own handle for a kernel file-to-socket transfer instead of
    /// going through [`Segment::read_at`].
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn last_offset(&self) -> i64 {
        self.last_offset.load(Ordering::Acquire)
    }

    /// Next offset this segment would assign if appended to.
    pub fn next_offset(&self) -> i64 {
        self.last_offset() + 1
    }

    pub fn size_bytes(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at_ms).max(0)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn last_max_timestamp(&self) -> i64 {
        self.last_batch_max_timestamp.load(Ordering::Acquire)
    }

    /// Append a pre-encoded, already-offset-assigned batch. Returns the file
    /// position it was written at.
    pub fn append_raw(
        &self,
        data: &[u8],
        batch_last_offset: i64,
        batch_max_timestamp: i64,
        index_interval_bytes: u64,
    ) -> Result<u64, SegmentError> {
        if self.is_sealed() {
            return Err(SegmentError::Sealed(self.base_offset));
        }
        let _guard = self.append_lock.lock();
        let pos = self.size.load(Ordering::Acquire);
        self.log_file.write_at(data, pos)?;

        let new_size = pos + data.len() as u64;
        let since = self.bytes_since_index.fetch_add(data.len() as u64, Ordering::AcqRel) + data.len() as u64;
        if since >= index_interval_bytes || self.index.read().is_empty() {
            let rel_offset = (batch_last_offset - self.base_offset) as u32;
            let entry = IndexEntry {
                rel_offset,
                file_offset: pos as u32,
            };
            self.index.write().push(entry);
            append_index_entry(&self.index_file, entry)?;

            let ts_entry = TimeIndexEntry {
                timestamp_ms: batch_max_timestamp,
                rel_offset,
            };
            self.timeindex.write().push(ts_entry);
            append_timeindex_entry(&self.timeindex_file, ts_entry)?;

            self.bytes_since_index.store(0, Ordering::Release);
        }

        self.size.store(new_size, Ordering::Release);
        self.last_offset.store(batch_last_offset, Ordering::Release);
        self.last_batch_max_timestamp
            .store(batch_max_timestamp, Ordering::Release);
        Ok(pos)
    }

    /// Read raw bytes at `pos..pos+len` out of the log file. Safe to call
    /// concurrently with other reads and with an in-flight append (pread
    /// does not race on the shared file position).
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        self.log_file.read_exact_at(buf, pos)
    }

    /// Largest file offset whose indexed relative offset is <= `target - base`.
    /// Returns 0 (scan from the start of the segment) if `target` precedes
    /// every indexed entry.
    pub fn floor_file_offset(&self, target_offset: i64) -> u64 {
        if target_offset <= self.base_offset {
            return 0;
        }
        let rel = (target_offset - self.base_offset) as u32;
        let index = self.index.read();
        match index.binary_search_by(|e| e.rel_offset.cmp(&rel)) {
            Ok(i) => index[i].file_offset as u64,
            Err(0) => 0,
            Err(i) => index[i - 1].file_offset as u64,
        }
    }

    /// Smallest offset whose batch's max timestamp is >= `target_ts`, or
    /// `None` if no indexed batch qualifies (caller falls through to the
    /// next segment).
    pub fn floor_offset_for_time(&self, target_ts: i64) -> Option<i64> {
        let timeindex = self.timeindex.read();
        timeindex
            .iter()
            .find(|e| e.timestamp_ms >= target_ts)
            .map(|e| self.base_offset + e.rel_offset as i64)
    }

    pub fn delete(self) -> io::Result<()> {
        let dir = self.log_path.parent().unwrap().to_path_buf();
        drop(self.log_file);
        std::fs::remove_file(log_path(&dir, self.base_offset)).ok();
        std::fs::remove_file(index_path(&dir, self.base_offset)).ok();
        std::fs::remove_file(timeindex_path(&dir, self.base_offset)).ok();
        Ok(())
    }
}

fn read_index_entries(file: &File) -> io::Result<Vec<IndexEntry>> {
    let len = file.metadata()?.len();
    let count = (len / INDEX_ENTRY_LEN) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut buf = [0u8; INDEX_ENTRY_LEN as usize];
    for i in 0..count {
        file.read_exact_at(&mut buf, i as u64 * INDEX_ENTRY_LEN)?;
        entries.push(IndexEntry {
            rel_offset: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            file_offset: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        });
    }
    Ok(entries)
}

fn read_timeindex_entries(file: &File) -> io::Result<Vec<TimeIndexEntry>> {
    let len = file.metadata()?.len();
    let count = (len / TIMEINDEX_ENTRY_LEN) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut buf = [0u8; TIMEINDEX_ENTRY_LEN as usize];
    for i in 0..count {
        file.read_exact_at(&mut buf, i as u64 * TIMEINDEX_ENTRY_LEN)?;
        entries.push(TimeIndexEntry {
            timestamp_ms: i64::from_be_bytes(buf[0..8].try_into().unwrap()),
            rel_offset: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        });
    }
    Ok(entries)
}

fn append_index_entry(file: &Mutex<File>, entry: IndexEntry) -> io::Result<()> {
    let f = file.lock();
    let pos = f.metadata()?.len();
    let mut buf = [0u8; INDEX_ENTRY_LEN as usize];
    buf[0..4].copy_from_slice(&entry.rel_offset.to_be_bytes());
    buf[4..8].copy_from_slice(&entry.file_offset.to_be_bytes());
    f.write_at(&buf, pos)
}

fn append_timeindex_entry(file: &Mutex<File>, entry: TimeIndexEntry) -> io::Result<()> {
    let f = file.lock();
    let pos = f.metadata()?.len();
    let mut buf = [0u8; TIMEINDEX_ENTRY_LEN as usize];
    buf[0..8].copy_from_slice(&entry.timestamp_ms.to_be_bytes());
    buf[8..12].copy_from_slice(&entry.rel_offset.to_be_bytes());
    f.write_at(&buf, pos)
}

fn persist_index(file: &File, entries: &[IndexEntry]) -> io::Result<()> {
    file.set_len(0)?;
    let mut pos = 0u64;
    for e in entries {
        let mut buf = [0u8; INDEX_ENTRY_LEN as usize];
        buf[0..4].copy_from_slice(&e.rel_offset.to_be_bytes());
        buf[4..8].copy_from_slice(&e.file_offset.to_be_bytes());
        file.write_at(&buf, pos)?;
        pos += INDEX_ENTRY_LEN;
    }
    Ok(())
}

fn persist_timeindex(file: &File, entries: &[TimeIndexEntry]) -> io::Result<()> {
    file.set_len(0)?;
    let mut pos = 0u64;
    for e in entries {
        let mut buf = [0u8; TIMEINDEX_ENTRY_LEN as usize];
        buf[0..8].copy_from_slice(&e.timestamp_ms.to_be_bytes());
        buf[8..12].copy_from_slice(&e.rel_offset.to_be_bytes());
        file.write_at(&buf, pos)?;
        pos += TIMEINDEX_ENTRY_LEN;
    }
    Ok(())
}

fn index_is_consistent(index: &[IndexEntry], log_size: u64) -> bool {
    if index.is_empty() {
        return true;
    }
    index.windows(2).all(|w| w[0].file_offset < w[1].file_offset)
        && (index.last().unwrap().file_offset as u64) < log_size
}

/// Walk the whole log validating each batch's length prefix and CRC.
/// Returns `(last_valid_offset, last_valid_max_timestamp, fully_consistent)`.
fn scan_for_last_offset_and_timestamp(file: &File, size: u64) -> io::Result<(i64, i64, bool)> {
    let mut pos = 0u64;
    let mut last_offset = -1i64;
    let mut last_ts = 0i64;
    let mut consistent = true;
    let mut header_buf = vec![0u8; BATCH_HEADER_LEN];

    while pos < size {
        if pos + BATCH_HEADER_LEN as u64 > size {
            consistent = false;
            break;
        }
        file.read_exact_at(&mut header_buf, pos)?;
        let header = match batch::parse_batch_header(&header_buf) {
            Ok(h) => h,
            Err(_) => {
                consistent = false;
                break;
            }
        };
        let total = header.total_len() as u64;
        if pos + total > size {
            consistent = false;
            break;
        }
        last_offset = header.last_offset();
        last_ts = header.max_timestamp;
        pos += total;
    }
    Ok((last_offset, last_ts, consistent))
}

fn rebuild_indexes(file: &File, size: u64) -> io::Result<(Vec<IndexEntry>, Vec<TimeIndexEntry>)> {
    let mut pos = 0u64;
    let mut index = Vec::new();
    let mut timeindex = Vec::new();
    let mut header_buf = vec![0u8; BATCH_HEADER_LEN];
    let base_offset = {
        if size == 0 {
            return Ok((index, timeindex));
        }
        file.read_exact_at(&mut header_buf, 0)?;
        batch::parse_batch_header(&header_buf)
            .map(|h| h.base_offset)
            .unwrap_or(0)
    };

    while pos < size {
        file.read_exact_at(&mut header_buf, pos)?;
        let header = match batch::parse_batch_header(&header_buf) {
            Ok(h) => h,
            Err(_) => break,
        };
        let rel_offset = (header.last_offset() - base_offset) as u32;
        index.push(IndexEntry {
            rel_offset,
            file_offset: pos as u32,
        });
        timeindex.push(TimeIndexEntry {
            timestamp_ms: header.max_timestamp,
            rel_offset,
        });
        pos += header.total_len() as u64;
    }
    Ok((index, timeindex))
}

/// Forward-scan for the active segment: build indexes fresh and determine
/// the valid (non-corrupt) prefix length to truncate to.
fn recover_active(
    file: &File,
    declared_size: u64,
    base_offset: i64,
) -> io::Result<(u64, i64, i64, Vec<IndexEntry>, Vec<TimeIndexEntry>)> {
    let mut pos = 0u64;
    let mut index = Vec::new();
    let mut timeindex = Vec::new();
    let mut last_offset = base_offset - 1;
    let mut last_ts = 0i64;
    let mut header_buf = vec![0u8; BATCH_HEADER_LEN];

    loop {
        if pos >= declared_size {
            break;
        }
        if pos + BATCH_HEADER_LEN as u64 > declared_size {
            break; // torn write: not even a full header present
        }
        if file.read_exact_at(&mut header_buf, pos).is_err() {
            break;
        }
        let header = match batch::parse_batch_header(&header_buf) {
            Ok(h) => h,
            Err(_) => break,
        };
        let total = header.total_len() as u64;
        if pos + total > declared_size {
            break;
        }
        let mut body = vec![0u8; total as usize];
        if file.read_exact_at(&mut body, pos).is_err() {
            break;
        }
        if batch::verify_crc(&header, &body).is_err() {
            break;
        }

        let rel_offset = (header.last_offset() - base_offset) as u32;
        index.push(IndexEntry {
            rel_offset,
            file_offset: pos as u32,
        });
        timeindex.push(TimeIndexEntry {
            timestamp_ms: header.max_timestamp,
            rel_offset,
        });
        last_offset = header.last_offset();
        last_ts = header.max_timestamp;
        pos += total;
    }

    Ok((pos, last_offset, last_ts, index, timeindex))
}
