//! Kafka record batch (v2, magic byte 2) header parsing.
//!
//! Storage treats the batch body as an opaque blob (spec §3 "RecordBatch").
//! This module only extracts the fixed-size header fields the log needs for
//! indexing and recovery: offsets, length, and timestamps. Full record
//! (key/value/header) decoding lives in `ridgeline-codec`.

/// Fixed header size before the `records` array: see spec §6 record batch layout.
pub const BATCH_HEADER_LEN: usize = 61;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub base_offset: i64,
    /// `batchLength` field: byte count from `partitionLeaderEpoch` through the end of `records`.
    pub batch_length: i32,
    pub partition_leader_epoch: i32,
    pub magic: i8,
    pub crc: u32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
}

impl BatchHeader {
    /// Total on-disk size of this batch, including the 12-byte
    /// `(baseOffset, batchLength)` prefix that precedes `batchLength`'s count.
    pub fn total_len(&self) -> usize {
        12 + self.batch_length as usize
    }

    pub fn last_offset(&self) -> i64 {
        self.base_offset + self.last_offset_delta as i64
    }

    pub fn record_count(&self) -> i64 {
        self.last_offset_delta as i64 + 1
    }

    /// Compression codec bits (attributes bits 0-2), per spec §6.
    pub fn compression(&self) -> u8 {
        (self.attributes & 0x07) as u8
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & (1 << 4) != 0
    }

    pub fn is_control(&self) -> bool {
        self.attributes & (1 << 5) != 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchParseError {
    #[error("batch shorter than the {BATCH_HEADER_LEN}-byte fixed header")]
    TooShort,
    #[error("unsupported magic byte {0}, only v2 (magic=2) batches are supported")]
    UnsupportedMagic(i8),
    #[error("declared batch length {declared} does not fit in the {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },
    #[error("crc mismatch: header says {expected:08x}, computed {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Parse the fixed header of a record batch starting at `data[0]`. Does not
/// validate CRC; call [`verify_crc`] separately (recovery wants to
/// distinguish "too short to parse" from "parsed but corrupt").
pub fn parse_batch_header(data: &[u8]) -> Result<BatchHeader, BatchParseError> {
    if data.len() < BATCH_HEADER_LEN {
        return Err(BatchParseError::TooShort);
    }
    let base_offset = i64::from_be_bytes(data[0..8].try_into().unwrap());
    let batch_length = i32::from_be_bytes(data[8..12].try_into().unwrap());
    let partition_leader_epoch = i32::from_be_bytes(data[12..16].try_into().unwrap());
    let magic = data[16] as i8;
    if magic != 2 {
        return Err(BatchParseError::UnsupportedMagic(magic));
    }
    let crc = u32::from_be_bytes(data[17..21].try_into().unwrap());
    let attributes = i16::from_be_bytes(data[21..23].try_into().unwrap());
    let last_offset_delta = i32::from_be_bytes(data[23..27].try_into().unwrap());
    let first_timestamp = i64::from_be_bytes(data[27..35].try_into().unwrap());
    let max_timestamp = i64::from_be_bytes(data[35..43].try_into().unwrap());
    let producer_id = i64::from_be_bytes(data[43..51].try_into().unwrap());
    let producer_epoch = i16::from_be_bytes(data[51..53].try_into().unwrap());
    let base_sequence = i32::from_be_bytes(data[53..57].try_into().unwrap());

    let header = BatchHeader {
        base_offset,
        batch_length,
        partition_leader_epoch,
        magic,
        crc,
        attributes,
        last_offset_delta,
        first_timestamp,
        max_timestamp,
        producer_id,
        producer_epoch,
        base_sequence,
    };

    if batch_length < 0 || header.total_len() > data.len() {
        return Err(BatchParseError::LengthMismatch {
            declared: header.total_len(),
            available: data.len(),
        });
    }

    Ok(header)
}

/// Verify the CRC-32C over the bytes from `attributes` through the end of
/// the batch (spec §6: "CRC-32C of bytes after crc").
pub fn verify_crc(header: &BatchHeader, data: &[u8]) -> Result<(), BatchParseError> {
    let crc_covered = &data[21..header.total_len()];
    let actual = crc32c::crc32c(crc_covered);
    if actual != header.crc {
        return Err(BatchParseError::CrcMismatch {
            expected: header.crc,
            actual,
        });
    }
    Ok(())
}

/// Overwrite the `baseOffset` field in-place with the offset the broker
/// assigned on append. The CRC does not cover `baseOffset`/`batchLength`, so
/// this never invalidates the batch's checksum.
pub fn rewrite_base_offset(data: &mut [u8], new_base_offset: i64) {
    data[0..8].copy_from_slice(&new_base_offset.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch(base_offset: i64, last_offset_delta: i32, max_timestamp: i64) -> Vec<u8> {
        let records_payload = vec![0u8; 16]; // opaque stand-in for the records array
        let mut buf = Vec::new();
        buf.extend_from_slice(&base_offset.to_be_bytes());
        let body_len = 4 + 1 + 4 + 2 + 4 + 8 + 8 + 8 + 2 + 4 + records_payload.len();
        buf.extend_from_slice(&(body_len as i32).to_be_bytes()); // batchLength
        buf.extend_from_slice(&0i32.to_be_bytes()); // partitionLeaderEpoch
        buf.push(2); // magic
        let crc_pos = buf.len();
        buf.extend_from_slice(&0u32.to_be_bytes()); // crc placeholder
        buf.extend_from_slice(&0i16.to_be_bytes()); // attributes
        buf.extend_from_slice(&last_offset_delta.to_be_bytes());
        buf.extend_from_slice(&1000i64.to_be_bytes()); // firstTimestamp
        buf.extend_from_slice(&max_timestamp.to_be_bytes());
        buf.extend_from_slice(&(-1i64).to_be_bytes()); // producerId
        buf.extend_from_slice(&(-1i16).to_be_bytes()); // producerEpoch
        buf.extend_from_slice(&(-1i32).to_be_bytes()); // baseSequence
        buf.extend_from_slice(&records_payload);

        let crc = crc32c::crc32c(&buf[crc_pos + 4..]);
        buf[crc_pos..crc_pos + 4].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_header_and_verifies_crc() {
        let data = sample_batch(0, 1, 1500);
        let header = parse_batch_header(&data).unwrap();
        assert_eq!(header.base_offset, 0);
        assert_eq!(header.last_offset(), 1);
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.max_timestamp, 1500);
        verify_crc(&header, &data).unwrap();
    }

    #[test]
    fn rejects_corrupt_crc() {
        let mut data = sample_batch(0, 0, 1000);
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let header = parse_batch_header(&data).unwrap();
        assert!(verify_crc(&header, &data).is_err());
    }

    #[test]
    fn rewrite_base_offset_does_not_invalidate_crc() {
        let mut data = sample_batch(999, 0, 1000);
        let header = parse_batch_header(&data).unwrap();
        rewrite_base_offset(&mut data, 42);
        verify_crc(&header, &data).unwrap();
        let header2 = parse_batch_header(&data).unwrap();
        assert_eq!(header2.base_offset, 42);
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(
            parse_batch_header(&[0u8; 10]),
            Err(BatchParseError::TooShort)
        ));
    }
}
