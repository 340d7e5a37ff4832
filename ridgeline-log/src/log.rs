//! `Log`: the ordered sequence of segments that makes up one partition.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use crate::batch::{self, BATCH_HEADER_LEN};
use crate::segment::Segment;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("requested offset {requested} is out of range [{earliest}, {high_watermark}]")]
    OffsetOutOfRange {
        requested: i64,
        earliest: i64,
        high_watermark: i64,
    },
    #[error("malformed record batch: {0}")]
    BadBatch(#[from] batch::BatchParseError),
    #[error("segment error: {0}")]
    Segment(#[from] crate::segment::SegmentError),
}

impl From<LogError> for ridgeline_common::Error {
    fn from(e: LogError) -> Self {
        match e {
            LogError::OffsetOutOfRange { requested, .. } => {
                ridgeline_common::error::StorageError::OffsetOutOfRange(requested).into()
            }
            LogError::Io(io) => ridgeline_common::Error::Io(io),
            LogError::BadBatch(ref e) => {
                ridgeline_common::error::StorageError::CorruptSegment(e.to_string()).into()
            }
            LogError::Segment(ref e) => {
                ridgeline_common::error::StorageError::CorruptSegment(e.to_string()).into()
            }
        }
    }
}

/// Descriptor for a fetch result: the bytes to return plus the offsets they
/// cover. Storage hands back the raw segment slice; `ridgeline-server`
/// decides whether to use `sendfile` or a buffered copy to the socket.
pub struct FetchSlice {
    pub data: Vec<u8>,
    pub start_offset: i64,
    pub high_watermark: i64,
}

/// A contiguous `(path, fileOffset, length)` byte range within one segment's
/// `.log` file, for a caller that wants to transfer it with a kernel
/// file-to-socket copy instead of reading it into memory first (spec §4.5's
/// zero-copy Fetch path, §9's "capability predicate on the writer").
#[derive(Debug, Clone)]
pub struct SegmentRange {
    pub path: PathBuf,
    pub file_offset: u64,
    pub length: usize,
}

pub struct FetchDescriptor {
    pub range: Option<SegmentRange>,
    pub start_offset: i64,
    pub high_watermark: i64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub max_segment_bytes: u64,
    pub max_segment_age_ms: i64,
    pub index_interval_bytes: u64,
}

/// One partition's segmented, append-only record log.
pub struct Log {
    dir: PathBuf,
    topic: String,
    partition: i32,
    config: LogConfig,
    sealed: RwLock<Vec<Segment>>,
    active: RwLock<Segment>,
    next_offset: AtomicI64,
}

fn parse_base_offset_from_stem(stem: &str) -> Option<i64> {
    if stem.len() != 20 {
        return None;
    }
    stem.parse::<i64>().ok()
}

fn discover_segment_base_offsets(dir: &Path) -> std::io::Result<Vec<i64>> {
    let mut bases = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("log") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(base) = parse_base_offset_from_stem(stem) {
                    bases.push(base);
                }
            }
        }
    }
    bases.sort_unstable();
    Ok(bases)
}

impl Log {
    /// Open (recovering if needed) or create a fresh log rooted at `dir`.
    /// `topic`/`partition` are used only to label metrics and log lines.
    pub fn open(
        dir: &Path,
        topic: impl Into<String>,
        partition: i32,
        config: LogConfig,
        now_ms: i64,
    ) -> Result<Self, LogError> {
        std::fs::create_dir_all(dir)?;
        let bases = discover_segment_base_offsets(dir)?;
        let topic = topic.into();

        let (sealed, active) = if bases.is_empty() {
            (Vec::new(), Segment::create(dir, 0, now_ms)?)
        } else {
            let (&last, rest) = bases.split_last().unwrap();
            let mut sealed = Vec::with_capacity(rest.len());
            for &base in rest {
                sealed.push(Segment::open_sealed(dir, base, now_ms)?);
            }
            let (active, discarded) = Segment::open_active_recover(dir, last, now_ms)?;
            if discarded > 0 {
                ridgeline_common::metrics::record_recovery_truncation(&topic, partition, discarded);
            }
            (sealed, active)
        };

        let next_offset = active.next_offset();

        Ok(Self {
            dir: dir.to_path_buf(),
            topic,
            partition,
            config,
            sealed: RwLock::new(sealed),
            active: RwLock::new(active),
            next_offset: AtomicI64::new(next_offset),
        })
    }

    /// Append one already-encoded record batch. Rewrites the batch's
    /// `baseOffset` in place with the offset assigned by the log, which is
    /// safe because the CRC does not cover that field. Returns `(base_offset,
    /// bytes_written)`.
    pub fn append(&self, mut data: Vec<u8>, now_ms: i64) -> Result<(i64, usize), LogError> {
        let header = batch::parse_batch_header(&data)?;
        batch::verify_crc(&header, &data)?;

        self.maybe_roll(data.len() as u64, now_ms)?;

        let base_offset = self.next_offset.fetch_add(header.record_count(), Ordering::AcqRel);
        let last_offset = base_offset + header.last_offset_delta as i64;
        batch::rewrite_base_offset(&mut data, base_offset);

        let active = self.active.read();
        active.append_raw(&data, last_offset, header.max_timestamp, self.config.index_interval_bytes)?;
        ridgeline_common::metrics::record_bytes_appended(&self.topic, self.partition, data.len() as u64);
        Ok((base_offset, data.len()))
    }

    fn maybe_roll(&self, incoming_len: u64, now_ms: i64) -> Result<(), LogError> {
        let needs_roll = {
            let active = self.active.read();
            active.size_bytes() + incoming_len > self.config.max_segment_bytes
                || active.age_ms(now_ms) > self.config.max_segment_age_ms
        };
        if !needs_roll {
            return Ok(());
        }

        let mut active = self.active.write();
        // Re-check under the write lock: another caller may have rolled already.
        if active.size_bytes() + incoming_len <= self.config.max_segment_bytes
            && active.age_ms(now_ms) <= self.config.max_segment_age_ms
        {
            return Ok(());
        }
        let new_base = active.next_offset();
        active.seal();
        let new_active = Segment::create(&self.dir, new_base, now_ms)?;
        let old = std::mem::replace(&mut *active, new_active);
        ridgeline_common::metrics::record_segment_roll(&self.topic, self.partition);
        self.sealed.write().push(old);
        Ok(())
    }

    /// Fetch up to `max_bytes` of record batches starting at `from_offset`.
    /// A single batch larger than `max_bytes` is still returned whole if
    /// `from_offset` points into it, guaranteeing forward progress.
    pub fn read(&self, from_offset: i64, max_bytes: usize) -> Result<FetchSlice, LogError> {
        let high_watermark = self.next_offset.load(Ordering::Acquire);
        let earliest = self.earliest_offset();

        if from_offset == high_watermark {
            return Ok(FetchSlice {
                data: Vec::new(),
                start_offset: from_offset,
                high_watermark,
            });
        }
        if from_offset < earliest || from_offset > high_watermark {
            return Err(LogError::OffsetOutOfRange {
                requested: from_offset,
                earliest,
                high_watermark,
            });
        }

        let sealed = self.sealed.read();
        let active = self.active.read();

        let segment = sealed
            .iter()
            .find(|s| from_offset <= s.last_offset() && from_offset >= s.base_offset())
            .or_else(|| {
                if from_offset >= active.base_offset() {
                    Some(&*active)
                } else {
                    None
                }
            });

        let Some(segment) = segment else {
            return Ok(FetchSlice {
                data: Vec::new(),
                start_offset: from_offset,
                high_watermark,
            });
        };

        let mut pos = segment.floor_file_offset(from_offset);
        let size = segment.size_bytes();
        let mut out = Vec::new();
        let mut header_buf = vec![0u8; BATCH_HEADER_LEN];

        while pos < size {
            segment.read_at(pos, &mut header_buf)?;
            let header = batch::parse_batch_header(&header_buf)?;
            let total = header.total_len();

            if header.last_offset() < from_offset {
                pos += total as u64;
                continue;
            }
            if !out.is_empty() && out.len() + total > max_bytes {
                break;
            }

            let mut body = vec![0u8; total];
            segment.read_at(pos, &mut body)?;
            out.extend_from_slice(&body);
            pos += total as u64;

            if out.len() >= max_bytes {
                break;
            }
        }

        Ok(FetchSlice {
            data: out,
            start_offset: from_offset,
            high_watermark,
        })
    }

    /// Same selection logic as [`Log::read`], but returns a `(path,
    /// fileOffset, length)` descriptor of the matching byte range instead of
    /// copying it into memory. The batches [`Log::read`] would collect are
    /// always contiguous on disk (appends are sequential and nothing is
    /// skipped once the starting batch is found), so the whole result is one
    /// range, never several.
    pub fn read_descriptor(&self, from_offset: i64, max_bytes: usize) -> Result<FetchDescriptor, LogError> {
        let high_watermark = self.next_offset.load(Ordering::Acquire);
        let earliest = self.earliest_offset();

        if from_offset == high_watermark {
            return Ok(FetchDescriptor {
                range: None,
                start_offset: from_offset,
                high_watermark,
            });
        }
        if from_offset < earliest || from_offset > high_watermark {
            return Err(LogError::OffsetOutOfRange {
                requested: from_offset,
                earliest,
                high_watermark,
            });
        }

        let sealed = self.sealed.read();
        let active = self.active.read();

        let segment = sealed
            .iter()
            .find(|s| from_offset <= s.last_offset() && from_offset >= s.base_offset())
            .or_else(|| {
                if from_offset >= active.base_offset() {
                    Some(&*active)
                } else {
                    None
                }
            });

        let Some(segment) = segment else {
            return Ok(FetchDescriptor {
                range: None,
                start_offset: from_offset,
                high_watermark,
            });
        };

        let mut pos = segment.floor_file_offset(from_offset);
        let size = segment.size_bytes();
        let mut header_buf = vec![0u8; BATCH_HEADER_LEN];
        let mut start_pos = None;
        let mut collected = 0usize;

        while pos < size {
            segment.read_at(pos, &mut header_buf)?;
            let header = batch::parse_batch_header(&header_buf)?;
            let total = header.total_len();

            if header.last_offset() < from_offset {
                pos += total as u64;
                continue;
            }
            if start_pos.is_some() && collected + total > max_bytes {
                break;
            }
            if start_pos.is_none() {
                start_pos = Some(pos);
            }
            collected += total;
            pos += total as u64;

            if collected >= max_bytes {
                break;
            }
        }

        let range = start_pos.map(|start| SegmentRange {
            path: segment.log_path().to_path_buf(),
            file_offset: start,
            length: collected,
        });

        Ok(FetchDescriptor {
            range,
            start_offset: from_offset,
            high_watermark,
        })
    }

    /// Earliest offset whose batch's max timestamp is >= `timestamp_ms`.
    pub fn read_by_time(&self, timestamp_ms: i64) -> Option<i64> {
        let sealed = self.sealed.read();
        for segment in sealed.iter() {
            if let Some(offset) = segment.floor_offset_for_time(timestamp_ms) {
                return Some(offset);
            }
        }
        self.active.read().floor_offset_for_time(timestamp_ms)
    }

    pub fn earliest_offset(&self) -> i64 {
        let sealed = self.sealed.read();
        sealed
            .first()
            .map(|s| s.base_offset())
            .unwrap_or_else(|| self.active.read().base_offset())
    }

    pub fn high_watermark(&self) -> i64 {
        self.next_offset.load(Ordering::Acquire)
    }

    pub fn size_bytes(&self) -> u64 {
        let sealed_size: u64 = self.sealed.read().iter().map(|s| s.size_bytes()).sum();
        sealed_size + self.active.read().size_bytes()
    }

    /// Evaluate size/age/start-offset retention rules; a segment is deleted
    /// if ANY configured rule says it should be (spec §4.1 Open Question
    /// resolution: retention is an "any rule" policy, not "all rules").
    pub fn enforce_retention(
        &self,
        retention_ms: Option<u64>,
        retention_bytes: Option<u64>,
        now_ms: i64,
    ) -> usize {
        let mut deleted = 0;
        loop {
            let candidate = {
                let sealed = self.sealed.read();
                let Some(oldest) = sealed.first() else {
                    break;
                };
                let total_size = self.size_bytes();

                let age_violation = retention_ms
                    .map(|limit| oldest.age_ms(now_ms) as u64 > limit)
                    .unwrap_or(false);
                let size_violation = retention_bytes
                    .map(|limit| total_size > limit)
                    .unwrap_or(false);

                if !age_violation && !size_violation {
                    break;
                }
                oldest.base_offset()
            };

            let mut sealed = self.sealed.write();
            if sealed.first().map(|s| s.base_offset()) != Some(candidate) {
                continue; // lost a race with a concurrent roll/delete, re-evaluate
            }
            let removed = sealed.remove(0);
            drop(sealed);
            if let Err(e) = removed.delete() {
                tracing::warn!(error = %e, "failed to remove retired segment files");
            }
            deleted += 1;
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> LogConfig {
        LogConfig {
            max_segment_bytes: 1024 * 1024,
            max_segment_age_ms: 3_600_000,
            index_interval_bytes: 4096,
        }
    }

    /// Builds a single-record batch the way `batch::parse_batch_header`
    /// expects, with `baseOffset` left at 0 (callers rewrite it on append).
    fn sample_batch(payload_len: usize, timestamp_ms: i64) -> Vec<u8> {
        let records_payload = vec![0xABu8; payload_len];
        let mut buf = Vec::new();
        buf.extend_from_slice(&0i64.to_be_bytes()); // baseOffset
        let body_len = 4 + 1 + 4 + 2 + 4 + 8 + 8 + 8 + 2 + 4 + records_payload.len();
        buf.extend_from_slice(&(body_len as i32).to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes()); // partitionLeaderEpoch
        buf.push(2); // magic
        let crc_pos = buf.len();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0i16.to_be_bytes()); // attributes
        buf.extend_from_slice(&0i32.to_be_bytes()); // lastOffsetDelta (single record)
        buf.extend_from_slice(&timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&(-1i64).to_be_bytes());
        buf.extend_from_slice(&(-1i16).to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.extend_from_slice(&records_payload);

        let crc = crc32c::crc32c(&buf[crc_pos + 4..]);
        buf[crc_pos..crc_pos + 4].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn append_then_read_round_trips_a_single_batch() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        let (base_offset, _) = log.append(sample_batch(16, 1000), 0).unwrap();
        assert_eq!(base_offset, 0);
        assert_eq!(log.high_watermark(), 1);

        let slice = log.read(0, 1024).unwrap();
        assert_eq!(slice.start_offset, 0);
        assert_eq!(slice.high_watermark, 1);
        assert_eq!(slice.data.len(), sample_batch(16, 1000).len());
    }

    #[test]
    fn read_at_high_watermark_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        log.append(sample_batch(8, 1000), 0).unwrap();
        let slice = log.read(1, 1024).unwrap();
        assert!(slice.data.is_empty());
    }

    #[test]
    fn read_past_high_watermark_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        log.append(sample_batch(8, 1000), 0).unwrap();
        assert!(matches!(log.read(5, 1024), Err(LogError::OffsetOutOfRange { .. })));
    }

    #[test]
    fn segment_rolls_once_max_bytes_exceeded() {
        let mut config = defaults();
        config.max_segment_bytes = 40;
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, config, 0).unwrap();
        for _ in 0..5 {
            log.append(sample_batch(8, 1000), 0).unwrap();
        }
        // five batches of ~37 bytes each, rolled every ~1 batch past the 40-byte cap
        assert!(log.size_bytes() > 0);
        assert_eq!(log.high_watermark(), 5);
    }

    #[test]
    fn read_descriptor_matches_read_length_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        log.append(sample_batch(16, 1000), 0).unwrap();
        log.append(sample_batch(16, 2000), 0).unwrap();

        let slice = log.read(0, 1024).unwrap();
        let descriptor = log.read_descriptor(0, 1024).unwrap();
        let range = descriptor.range.expect("expected a non-empty range");
        assert_eq!(range.length, slice.data.len());
        assert!(range.path.ends_with("00000000000000000000.log"));
    }

    #[test]
    fn read_descriptor_at_high_watermark_has_no_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        log.append(sample_batch(8, 1000), 0).unwrap();
        let descriptor = log.read_descriptor(1, 1024).unwrap();
        assert!(descriptor.range.is_none());
    }

    #[test]
    fn recovery_truncates_a_torn_write() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
            log.append(sample_batch(16, 1000), 0).unwrap();
        }
        // Simulate a torn write: append a truncated trailing batch directly.
        let log_file = dir.path().join("00000000000000000000.log");
        let mut bytes = std::fs::read(&log_file).unwrap();
        let good_len = bytes.len();
        bytes.extend_from_slice(&sample_batch(16, 2000)[..20]); // partial batch
        std::fs::write(&log_file, &bytes).unwrap();

        let log = Log::open(dir.path(), "orders", 0, defaults(), 0).unwrap();
        assert_eq!(log.size_bytes(), good_len as u64);
        assert_eq!(log.high_watermark(), 1);
    }
}
