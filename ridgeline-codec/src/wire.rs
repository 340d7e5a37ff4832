//! Primitive Kafka wire types: big-endian ints, length-prefixed strings and
//! byte arrays, and `Int32`-counted element arrays. See spec §6.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("buffer underrun: needed {needed} bytes, had {available}")]
    Underrun { needed: usize, available: usize },
    #[error("negative length {0} where a non-nullable size was expected")]
    NegativeLength(i32),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
}

pub type WireResult<T> = Result<T, WireError>;

fn need(buf: &impl Buf, n: usize) -> WireResult<()> {
    if buf.remaining() < n {
        Err(WireError::Underrun {
            needed: n,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

pub fn get_i8(buf: &mut impl Buf) -> WireResult<i8> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn get_i16(buf: &mut impl Buf) -> WireResult<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn get_i32(buf: &mut impl Buf) -> WireResult<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut impl Buf) -> WireResult<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn get_u32(buf: &mut impl Buf) -> WireResult<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_bool(buf: &mut impl Buf) -> WireResult<bool> {
    Ok(get_i8(buf)? != 0)
}

/// `Int16` length prefix; `-1` means `None`.
pub fn get_nullable_string(buf: &mut impl Buf) -> WireResult<Option<String>> {
    let len = get_i16(buf)?;
    if len < -1 {
        return Err(WireError::NegativeLength(len as i32));
    }
    if len == -1 {
        return Ok(None);
    }
    let len = len as usize;
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map(Some).map_err(|_| WireError::InvalidUtf8)
}

pub fn get_string(buf: &mut impl Buf) -> WireResult<String> {
    get_nullable_string(buf)?.ok_or(WireError::NegativeLength(-1))
}

pub fn put_nullable_string(buf: &mut impl BufMut, s: Option<&str>) {
    match s {
        None => buf.put_i16(-1),
        Some(s) => {
            buf.put_i16(s.len() as i16);
            buf.put_slice(s.as_bytes());
        }
    }
}

pub fn put_string(buf: &mut impl BufMut, s: &str) {
    put_nullable_string(buf, Some(s));
}

/// `Int32` length prefix; `-1` means `None`.
pub fn get_nullable_bytes(buf: &mut impl Buf) -> WireResult<Option<Bytes>> {
    let len = get_i32(buf)?;
    if len < -1 {
        return Err(WireError::NegativeLength(len));
    }
    if len == -1 {
        return Ok(None);
    }
    let len = len as usize;
    need(buf, len)?;
    Ok(Some(buf.copy_to_bytes(len)))
}

pub fn put_nullable_bytes(buf: &mut impl BufMut, b: Option<&[u8]>) {
    match b {
        None => buf.put_i32(-1),
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
    }
}

/// Reads an `Int32` count followed by `count` elements, each parsed by `f`.
/// A count of `-1` (used by some older null-array encodings) yields an
/// empty vector rather than an error.
pub fn get_array<T>(
    buf: &mut impl Buf,
    mut f: impl FnMut(&mut dyn Buf) -> WireResult<T>,
) -> WireResult<Vec<T>> {
    let count = get_i32(buf)?;
    if count <= 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(f(buf)?);
    }
    Ok(out)
}

pub fn put_array<T>(buf: &mut impl BufMut, items: &[T], mut f: impl FnMut(&mut dyn BufMut, &T)) {
    buf.put_i32(items.len() as i32);
    for item in items {
        f(buf, item);
    }
}

/// Frame a payload with its `Int32` length prefix, as used on the wire for
/// both requests and responses.
pub fn frame(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.put_i32(payload.len() as i32);
    out.put_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello");
        let mut frozen = buf.freeze();
        assert_eq!(get_string(&mut frozen).unwrap(), "hello");
    }

    #[test]
    fn nullable_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_nullable_string(&mut buf, None);
        let mut frozen = buf.freeze();
        assert_eq!(get_nullable_string(&mut frozen).unwrap(), None);
    }

    #[test]
    fn nullable_bytes_roundtrip() {
        let mut buf = BytesMut::new();
        put_nullable_bytes(&mut buf, Some(b"abc"));
        let mut frozen = buf.freeze();
        assert_eq!(get_nullable_bytes(&mut frozen).unwrap().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn underrun_is_reported() {
        let mut buf = Bytes::from_static(&[0u8; 1]);
        assert!(matches!(get_i32(&mut buf), Err(WireError::Underrun { .. })));
    }
}
