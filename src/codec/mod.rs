//! Compression codecs for stream payloads.
//!
//! The on-disk stream metadata record (§3/§6.1) carries a 16-bit
//! `compression` enum with four members: `none`, `zip`, `gzip`, `bzip2`.
//! `zip` and `gzip` are both DEFLATE-family but carry different framing —
//! `zip` is implemented as raw DEFLATE (no header), `gzip` as the gzip
//! container (magic + CRC32 + size trailer) — so the two stay observably
//! distinct on disk rather than collapsing into one codec.

use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Compression algorithm identifier, matching the wire values of the
/// stream-metadata and entry-record `compression` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 0,
    Zip = 1,
    Gzip = 2,
    Bzip2 = 3,
}

impl Compression {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Compression::None),
            1 => Some(Compression::Zip),
            2 => Some(Compression::Gzip),
            3 => Some(Compression::Bzip2),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zip => "zip",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }
}

/// A compression codec: a symmetric compress/decompress pair.
pub trait Codec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

struct NoneCodec;
impl Codec for NoneCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

struct ZipCodec;
impl Codec for ZipCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::write::DeflateEncoder;
        let mut enc = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::read::DeflateDecoder;
        let mut dec = DeflateDecoder::new(data);
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

struct GzipCodec;
impl Codec for GzipCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::write::GzEncoder;
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use flate2::read::GzDecoder;
        let mut dec = GzDecoder::new(data);
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

struct Bzip2Codec;
impl Codec for Bzip2Codec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use bzip2::write::BzEncoder;
        let mut enc = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        use bzip2::read::BzDecoder;
        let mut dec = BzDecoder::new(data);
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

/// Look up the codec implementation for a `Compression` value.
pub fn get_codec(c: Compression) -> Box<dyn Codec> {
    match c {
        Compression::None => Box::new(NoneCodec),
        Compression::Zip => Box::new(ZipCodec),
        Compression::Gzip => Box::new(GzipCodec),
        Compression::Bzip2 => Box::new(Bzip2Codec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(c: Compression) {
        let codec = get_codec(c);
        let data = b"the quick brown fox jumps over the lazy dog".repeat(32);
        let compressed = codec.compress(&data).unwrap();
        let back = codec.decompress(&compressed).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn none_roundtrip() {
        roundtrip(Compression::None);
    }

    #[test]
    fn zip_roundtrip() {
        roundtrip(Compression::Zip);
    }

    #[test]
    fn gzip_roundtrip() {
        roundtrip(Compression::Gzip);
    }

    #[test]
    fn bzip2_roundtrip() {
        roundtrip(Compression::Bzip2);
    }
}
