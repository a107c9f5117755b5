//! Byte-level compression codecs
//!
//! Zlib and Gzip are always built in. Zstd, LZ4 and Brotli sit behind cargo
//! features and may be missing at runtime; the registry probes for them once.

use crate::StateError;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression method selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CompressionMethod {
    /// Plain JSON, no compression
    None,
    /// Gzip framing around deflate
    Gzip,
    /// Zlib framing around deflate (always available)
    Zlib,
    /// Zstandard compression (better ratio, slightly slower)
    Zstd,
    /// LZ4 compression (faster, lower ratio)
    Lz4,
    /// Brotli compression (best ratio on large text)
    Brotli,
    /// Path-based delta against the client's baseline
    Delta,
    /// Delta, then the diff compressed with the default codec
    Hybrid,
}

impl CompressionMethod {
    pub const ALL: [CompressionMethod; 8] = [
        CompressionMethod::None,
        CompressionMethod::Gzip,
        CompressionMethod::Zlib,
        CompressionMethod::Zstd,
        CompressionMethod::Lz4,
        CompressionMethod::Brotli,
        CompressionMethod::Delta,
        CompressionMethod::Hybrid,
    ];

    /// Wire name of this method
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "NONE",
            CompressionMethod::Gzip => "GZIP",
            CompressionMethod::Zlib => "ZLIB",
            CompressionMethod::Zstd => "ZSTD",
            CompressionMethod::Lz4 => "LZ4",
            CompressionMethod::Brotli => "BROTLI",
            CompressionMethod::Delta => "DELTA",
            CompressionMethod::Hybrid => "HYBRID",
        }
    }

    /// Whether this is a general-purpose byte compressor
    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            CompressionMethod::Gzip
                | CompressionMethod::Zlib
                | CompressionMethod::Zstd
                | CompressionMethod::Lz4
                | CompressionMethod::Brotli
        )
    }

    /// Whether this codec may be absent at runtime
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            CompressionMethod::Zstd | CompressionMethod::Lz4 | CompressionMethod::Brotli
        )
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompressionMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StateError::MalformedPayload(format!("unknown compression method {s}")))
    }
}

/// Abstract compression level, mapped onto each codec's own scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CompressionLevel {
    Fastest,
    Fast,
    #[default]
    Balanced,
    High,
    Maximum,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 5] = [
        CompressionLevel::Fastest,
        CompressionLevel::Fast,
        CompressionLevel::Balanced,
        CompressionLevel::High,
        CompressionLevel::Maximum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Fastest => "FASTEST",
            CompressionLevel::Fast => "FAST",
            CompressionLevel::Balanced => "BALANCED",
            CompressionLevel::High => "HIGH",
            CompressionLevel::Maximum => "MAXIMUM",
        }
    }

    /// Zlib and gzip level (1-9)
    pub fn zlib_level(&self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Balanced => 6,
            CompressionLevel::High => 8,
            CompressionLevel::Maximum => 9,
        }
    }

    /// Brotli quality (0-11)
    pub fn brotli_quality(&self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Balanced => 6,
            CompressionLevel::High => 9,
            CompressionLevel::Maximum => 11,
        }
    }

    /// Zstandard level (1-22)
    pub fn zstd_level(&self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Balanced => 9,
            CompressionLevel::High => 15,
            CompressionLevel::Maximum => 19,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompressionLevel::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StateError::MalformedPayload(format!("unknown compression level {s}")))
    }
}

/// A general-purpose byte compressor
pub trait ByteCodec: Send + Sync {
    /// Compress data at the given abstract level
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, StateError>;

    /// Decompress data, refusing to produce more than `limit` bytes
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError>;

    /// Method this codec implements
    fn method(&self) -> CompressionMethod;
}

/// Create a codec for the given method, if it is compiled in
pub fn create_codec(method: CompressionMethod) -> Option<Box<dyn ByteCodec>> {
    match method {
        CompressionMethod::Zlib => Some(Box::new(ZlibCodec)),
        CompressionMethod::Gzip => Some(Box::new(GzipCodec)),
        #[cfg(feature = "zstd")]
        CompressionMethod::Zstd => Some(Box::new(ZstdCodec)),
        #[cfg(feature = "lz4")]
        CompressionMethod::Lz4 => Some(Box::new(Lz4Codec)),
        #[cfg(feature = "brotli")]
        CompressionMethod::Brotli => Some(Box::new(BrotliCodec)),
        _ => None,
    }
}

/// Read a decompressing stream to the end, bounded by `limit`
fn read_bounded(reader: impl Read, limit: usize, codec: &str) -> Result<Vec<u8>, StateError> {
    let mut decompressed = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| StateError::MalformedPayload(format!("Failed to decompress {codec} data: {e}")))?;

    if decompressed.len() > limit {
        return Err(StateError::LimitExceeded {
            what: "decompressed payload",
            size: decompressed.len(),
            limit,
        });
    }
    Ok(decompressed)
}

/// Zlib codec, the guaranteed fallback
#[derive(Debug, Default)]
pub struct ZlibCodec;

impl ByteCodec for ZlibCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, StateError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.zlib_level()));
        encoder.write_all(data).map_err(|e| {
            StateError::Compression(format!("Failed to write to zlib encoder: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StateError::Compression(format!("Failed to finish zlib encoding: {e}")))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError> {
        read_bounded(ZlibDecoder::new(data), limit, "zlib")
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zlib
    }
}

/// Gzip codec
#[derive(Debug, Default)]
pub struct GzipCodec;

impl ByteCodec for GzipCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, StateError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.zlib_level()));
        encoder.write_all(data).map_err(|e| {
            StateError::Compression(format!("Failed to write to gzip encoder: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StateError::Compression(format!("Failed to finish gzip encoding: {e}")))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError> {
        read_bounded(GzDecoder::new(data), limit, "gzip")
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Gzip
    }
}

/// Zstandard codec
#[cfg(feature = "zstd")]
#[derive(Debug, Default)]
pub struct ZstdCodec;

#[cfg(feature = "zstd")]
impl ByteCodec for ZstdCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, StateError> {
        let mut encoder = zstd::Encoder::new(Vec::new(), level.zstd_level()).map_err(|e| {
            StateError::Compression(format!("Failed to create zstd encoder: {e}"))
        })?;

        encoder.write_all(data).map_err(|e| {
            StateError::Compression(format!("Failed to write to zstd encoder: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StateError::Compression(format!("Failed to finish zstd encoding: {e}")))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError> {
        let decoder = zstd::Decoder::new(data).map_err(|e| {
            StateError::MalformedPayload(format!("Failed to create zstd decoder: {e}"))
        })?;
        read_bounded(decoder, limit, "zstd")
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// LZ4 block codec; LZ4 has no levels in the block format
#[cfg(feature = "lz4")]
#[derive(Debug, Default)]
pub struct Lz4Codec;

#[cfg(feature = "lz4")]
impl ByteCodec for Lz4Codec {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>, StateError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError> {
        // The size prefix is trusted by lz4_flex for allocation, check it first
        let prefix: [u8; 4] = data
            .get(..4)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| StateError::MalformedPayload("LZ4 payload too short".to_string()))?;
        let size = u32::from_le_bytes(prefix) as usize;
        if size > limit {
            return Err(StateError::LimitExceeded {
                what: "decompressed payload",
                size,
                limit,
            });
        }

        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| StateError::MalformedPayload(format!("LZ4 decompression failed: {e}")))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Lz4
    }
}

/// Brotli codec
#[cfg(feature = "brotli")]
#[derive(Debug, Default)]
pub struct BrotliCodec;

#[cfg(feature = "brotli")]
const BROTLI_BUFFER_SIZE: usize = 4096;
#[cfg(feature = "brotli")]
const BROTLI_WINDOW_BITS: u32 = 22;

#[cfg(feature = "brotli")]
impl ByteCodec for BrotliCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, StateError> {
        let mut writer = brotli::CompressorWriter::new(
            Vec::new(),
            BROTLI_BUFFER_SIZE,
            level.brotli_quality(),
            BROTLI_WINDOW_BITS,
        );
        writer.write_all(data).map_err(|e| {
            StateError::Compression(format!("Failed to write to brotli encoder: {e}"))
        })?;
        writer
            .flush()
            .map_err(|e| StateError::Compression(format!("Failed to flush brotli encoder: {e}")))?;

        Ok(writer.into_inner())
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, StateError> {
        read_bounded(
            brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE),
            limit,
            "brotli",
        )
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Brotli
    }
}
