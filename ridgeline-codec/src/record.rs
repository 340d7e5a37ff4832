//! Individual records within a v2 record batch, and whole-batch
//! encode/decode (header + varint record array + CRC-32C), building on
//! [`ridgeline_log::batch`] for the fixed header shape.

use bytes::{Buf, BufMut, BytesMut};

use crate::compression::{self, Compression, CompressionError};
use crate::varint;
use crate::wire::{self, WireError, WireResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset_delta: i32,
    pub timestamp_delta: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Batch(#[from] ridgeline_log::batch::BatchParseError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

fn encode_record(buf: &mut BytesMut, record: &Record) {
    let mut body = BytesMut::new();
    body.put_i8(0); // record attributes: unused, always 0
    varint::put_varlong(&mut body, record.timestamp_delta);
    varint::put_varint(&mut body, record.offset_delta);
    encode_record_bytes(&mut body, record.key.as_deref());
    encode_record_bytes(&mut body, record.value.as_deref());
    varint::put_varint(&mut body, record.headers.len() as i32);
    for h in &record.headers {
        varint::put_varint(&mut body, h.key.len() as i32);
        body.put_slice(h.key.as_bytes());
        encode_record_bytes(&mut body, h.value.as_deref());
    }

    varint::put_varint(buf, body.len() as i32);
    buf.put_slice(&body);
}

fn encode_record_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        None => varint::put_varint(buf, -1),
        Some(d) => {
            varint::put_varint(buf, d.len() as i32);
            buf.put_slice(d);
        }
    }
}

fn decode_record_bytes(buf: &mut impl Buf) -> WireResult<Option<Vec<u8>>> {
    let len = varint::get_varint(buf)?;
    if len < -1 {
        return Err(WireError::NegativeLength(len));
    }
    if len == -1 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(WireError::Underrun {
            needed: len,
            available: buf.remaining(),
        });
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(Some(out))
}

fn decode_record(buf: &mut impl Buf) -> WireResult<Record> {
    let len = varint::get_varint(buf)?;
    if len < 0 {
        return Err(WireError::NegativeLength(len));
    }
    let mut body = buf.copy_to_bytes(len as usize);

    let _attributes = wire::get_i8(&mut body)?;
    let timestamp_delta = varint::get_varlong(&mut body)?;
    let offset_delta = varint::get_varint(&mut body)?;
    let key = decode_record_bytes(&mut body)?;
    let value = decode_record_bytes(&mut body)?;

    let header_count = varint::get_varint(&mut body)?;
    let mut headers = Vec::new();
    if header_count > 0 {
        for _ in 0..header_count {
            let key_len = varint::get_varint(&mut body)?;
            if key_len < 0 {
                return Err(WireError::NegativeLength(key_len));
            }
            let mut key_buf = vec![0u8; key_len as usize];
            body.copy_to_slice(&mut key_buf);
            let key = String::from_utf8(key_buf).map_err(|_| WireError::InvalidUtf8)?;
            let value = decode_record_bytes(&mut body)?;
            headers.push(RecordHeader { key, value });
        }
    }

    Ok(Record {
        offset_delta,
        timestamp_delta,
        key,
        value,
        headers,
    })
}

/// Encode a full v2 record batch: fixed header, varint records array
/// (optionally compressed), then the CRC-32C over everything from
/// `attributes` onward. `base_offset` here is always `0`; the log rewrites
/// it on append once the real offset is known.
pub fn encode_batch(
    records: &[Record],
    first_timestamp: i64,
    producer_id: i64,
    producer_epoch: i16,
    base_sequence: i32,
    compression: Compression,
) -> Result<Vec<u8>, RecordError> {
    let mut records_buf = BytesMut::new();
    for r in records {
        encode_record(&mut records_buf, r);
    }
    let records_payload = if compression == Compression::None {
        records_buf.to_vec()
    } else {
        compression::compress(compression, &records_buf)?
    };

    let max_timestamp = records
        .iter()
        .map(|r| first_timestamp + r.timestamp_delta)
        .max()
        .unwrap_or(first_timestamp);
    let last_offset_delta = records.last().map(|r| r.offset_delta).unwrap_or(0);

    let mut body = BytesMut::new(); // everything from attributes onward
    let attributes: i16 = compression.attribute_bits();
    body.put_i16(attributes);
    body.put_i32(last_offset_delta);
    body.put_i64(first_timestamp);
    body.put_i64(max_timestamp);
    body.put_i64(producer_id);
    body.put_i16(producer_epoch);
    body.put_i32(base_sequence);
    body.put_i32(records.len() as i32);
    body.put_slice(&records_payload);

    let crc = crc32c::crc32c(&body);

    let mut out = BytesMut::with_capacity(21 + body.len());
    out.put_i64(0); // baseOffset, rewritten by the log on append
    out.put_i32((4 + 1 + 4 + body.len()) as i32); // batchLength: partitionLeaderEpoch+magic+crc+body
    out.put_i32(0); // partitionLeaderEpoch
    out.put_i8(2); // magic
    out.put_u32(crc);
    out.put_slice(&body);

    Ok(out.to_vec())
}

/// Decode the records out of an on-disk batch, reversing whatever
/// compression its `attributes` field declares.
pub fn decode_batch_records(data: &[u8]) -> Result<Vec<Record>, RecordError> {
    let header = ridgeline_log::batch::parse_batch_header(data)?;
    let records_start = ridgeline_log::batch::BATCH_HEADER_LEN;
    let records_end = header.total_len();
    let compressed = &data[records_start..records_end];

    let codec = Compression::from_attributes(header.attributes).unwrap_or(Compression::None);
    let raw = compression::decompress(codec, compressed)?;

    let mut buf = raw.as_slice();
    let mut out = Vec::with_capacity(header.record_count().max(0) as usize);
    for _ in 0..header.record_count() {
        out.push(decode_record(&mut buf)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<Record> {
        vec![
            Record {
                offset_delta: 0,
                timestamp_delta: 0,
                key: Some(b"k".to_vec()),
                value: Some(b"v1".to_vec()),
                headers: vec![],
            },
            Record {
                offset_delta: 1,
                timestamp_delta: 5,
                key: Some(b"k".to_vec()),
                value: Some(b"v2".to_vec()),
                headers: vec![RecordHeader {
                    key: "trace-id".to_string(),
                    value: Some(b"abc".to_vec()),
                }],
            },
        ]
    }

    #[test]
    fn batch_roundtrip_uncompressed() {
        let records = sample_records();
        let batch = encode_batch(&records, 1000, -1, -1, -1, Compression::None).unwrap();
        let header = ridgeline_log::batch::parse_batch_header(&batch).unwrap();
        ridgeline_log::batch::verify_crc(&header, &batch).unwrap();
        assert_eq!(header.max_timestamp, 1005);

        let decoded = decode_batch_records(&batch).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn batch_roundtrip_compressed() {
        let records = sample_records();
        for codec in [Compression::Gzip, Compression::Lz4, Compression::Zstd, Compression::Snappy] {
            let batch = encode_batch(&records, 1000, 42, 0, 0, codec).unwrap();
            let decoded = decode_batch_records(&batch).unwrap();
            assert_eq!(decoded, records, "codec={codec:?}");
        }
    }
}
