//! Metadata carried alongside every compressed payload

use crate::compress::{CompressionLevel, CompressionMethod};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire form of `metadata.method`.
///
/// Names this build does not know about deserialize into `Unknown` rather
/// than failing, so a newer peer's payloads still reach the fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MethodTag {
    Known(CompressionMethod),
    Unknown(String),
}

impl From<String> for MethodTag {
    fn from(name: String) -> Self {
        match name.parse() {
            Ok(method) => MethodTag::Known(method),
            Err(_) => MethodTag::Unknown(name),
        }
    }
}

impl From<MethodTag> for String {
    fn from(tag: MethodTag) -> Self {
        match tag {
            MethodTag::Known(method) => method.as_str().to_string(),
            MethodTag::Unknown(name) => name,
        }
    }
}

impl From<CompressionMethod> for MethodTag {
    fn from(method: CompressionMethod) -> Self {
        MethodTag::Known(method)
    }
}

impl fmt::Display for MethodTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodTag::Known(method) => f.write_str(method.as_str()),
            MethodTag::Unknown(name) => f.write_str(name),
        }
    }
}

/// Get current timestamp in unix seconds
pub fn timestamp_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Describes how a payload was produced and how to undo it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Method actually used, rewritten on fallback
    pub method: MethodTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CompressionLevel>,
    /// Whether the payload is a delta against a cached baseline
    #[serde(default)]
    pub delta: bool,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
    /// Number of delta operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_hash: Option<String>,
    pub timestamp: f64,
}

impl Metadata {
    /// Metadata for a payload of `original_size` bytes compressed to `compressed_size`
    pub fn new(method: CompressionMethod, original_size: usize, compressed_size: usize) -> Self {
        Self {
            method: method.into(),
            level: None,
            delta: false,
            original_size,
            compressed_size,
            compression_ratio: ratio(original_size, compressed_size),
            operations: None,
            client_id: None,
            base_hash: None,
            timestamp: timestamp_now(),
        }
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Record a new compressed size and refresh the ratio
    pub fn set_compressed_size(&mut self, compressed_size: usize) {
        self.compressed_size = compressed_size;
        self.compression_ratio = ratio(self.original_size, compressed_size);
    }

    /// The method as a known enum value, if this build recognises it
    pub fn known_method(&self) -> Option<CompressionMethod> {
        match self.method {
            MethodTag::Known(method) => Some(method),
            MethodTag::Unknown(_) => None,
        }
    }
}

fn ratio(original_size: usize, compressed_size: usize) -> f64 {
    if compressed_size == 0 {
        1.0
    } else {
        original_size as f64 / compressed_size as f64
    }
}
