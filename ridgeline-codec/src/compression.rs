//! Record batch compression codecs. The codec in use is carried in the
//! batch's `attributes` bits 0-2 (spec §6); storage itself never
//! compresses or decompresses, only `ridgeline-codec` and its callers do.

use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn from_attributes(attributes: i16) -> Option<Self> {
        match attributes & 0x07 {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            2 => Some(Self::Snappy),
            3 => Some(Self::Lz4),
            4 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn attribute_bits(self) -> i16 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Snappy => 2,
            Self::Lz4 => 3,
            Self::Zstd => 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("io error during (de)compression: {0}")]
    Io(#[from] std::io::Error),
    #[error("snappy error: {0}")]
    Snappy(String),
    #[error("lz4 error: {0}")]
    Lz4(String),
    #[error("zstd error: {0}")]
    Zstd(String),
}

pub fn compress(codec: Compression, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data)?;
            Ok(enc.finish()?)
        }
        Compression::Snappy => {
            let mut enc = snap::raw::Encoder::new();
            enc.compress_vec(data).map_err(|e| CompressionError::Snappy(e.to_string()))
        }
        Compression::Lz4 => Ok(lz4_flex::block::compress_prepend_size(data)),
        Compression::Zstd => zstd::stream::encode_all(data, 0).map_err(CompressionError::Io),
    }
}

pub fn decompress(codec: Compression, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut dec = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            dec.read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Snappy => {
            let mut dec = snap::raw::Decoder::new();
            dec.decompress_vec(data).map_err(|e| CompressionError::Snappy(e.to_string()))
        }
        Compression::Lz4 => lz4_flex::block::decompress_size_prepended(data)
            .map_err(|e| CompressionError::Lz4(e.to_string())),
        Compression::Zstd => zstd::stream::decode_all(data).map_err(CompressionError::Io),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_codec_including_empty_input() {
        for codec in [
            Compression::None,
            Compression::Gzip,
            Compression::Snappy,
            Compression::Lz4,
            Compression::Zstd,
        ] {
            for input in [&b""[..], b"hello world", &[7u8; 4096][..]] {
                let compressed = compress(codec, input).unwrap();
                let decompressed = decompress(codec, &compressed).unwrap();
                assert_eq!(decompressed, input, "codec={codec:?}");
            }
        }
    }

    #[test]
    fn attribute_bits_roundtrip() {
        for codec in [
            Compression::None,
            Compression::Gzip,
            Compression::Snappy,
            Compression::Lz4,
            Compression::Zstd,
        ] {
            assert_eq!(Compression::from_attributes(codec.attribute_bits()), Some(codec));
        }
    }
}
