//! Runtime configuration for the synchronization layer

use crate::compress::{CompressionLevel, CompressionMethod};
use std::str::FromStr;
use tracing::warn;

/// Environment variable overriding the default compression method
pub const METHOD_ENV_VAR: &str = "STATEWIRE_METHOD";
/// Environment variable overriding the default compression level
pub const LEVEL_ENV_VAR: &str = "STATEWIRE_LEVEL";
/// Environment variable overriding the baseline mismatch policy
pub const MISMATCH_POLICY_ENV_VAR: &str = "STATEWIRE_MISMATCH_POLICY";
/// Environment variable overriding the payload size limit
pub const MAX_PAYLOAD_ENV_VAR: &str = "STATEWIRE_MAX_PAYLOAD_BYTES";

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_OPERATIONS: usize = 100_000;
const DEFAULT_MAX_RLE_ELEMENTS: usize = 1_000_000;

/// What a delta decode does when the embedded baseline hash does not match
/// the cached baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MismatchPolicy {
    /// Fail with `BaselineMismatch` and leave the cached baseline untouched
    #[default]
    Strict,
    /// Log the mismatch and apply the operations to the current baseline
    Lenient,
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(MismatchPolicy::Strict),
            "lenient" => Ok(MismatchPolicy::Lenient),
            other => Err(format!("unknown mismatch policy: {other}")),
        }
    }
}

/// Configuration shared by the engine, the codec registry and the optimizer
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Method used by `NetworkCodec::encode_for_network`
    pub default_method: CompressionMethod,
    /// Level used by `NetworkCodec::encode_for_network`
    pub default_level: CompressionLevel,
    pub mismatch_policy: MismatchPolicy,
    /// Optional codecs left out of the startup capability probe
    pub disabled_codecs: Vec<CompressionMethod>,
    /// Upper bound for serialized and decompressed payloads
    pub max_payload_bytes: usize,
    /// Upper bound for operations in a single delta message
    pub max_operations: usize,
    /// Sequences must be longer than this before RLE is attempted
    pub rle_min_length: usize,
    /// Shortest run collapsed into a `[count, value]` pair
    pub rle_min_run: usize,
    /// RLE form is adopted only at or below this fraction of the original length
    pub rle_max_ratio: f64,
    /// Upper bound for values materialized when expanding RLE runs
    pub max_rle_elements: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_method: CompressionMethod::Hybrid,
            default_level: CompressionLevel::Balanced,
            mismatch_policy: MismatchPolicy::Strict,
            disabled_codecs: Vec::new(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_operations: DEFAULT_MAX_OPERATIONS,
            rle_min_length: 5,
            rle_min_run: 3,
            rle_max_ratio: 0.8,
            max_rle_elements: DEFAULT_MAX_RLE_ELEMENTS,
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with any `STATEWIRE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(METHOD_ENV_VAR) {
            match value.parse() {
                Ok(method) => self.default_method = method,
                Err(e) => warn!("Ignoring {METHOD_ENV_VAR}: {e}"),
            }
        }
        if let Some(value) = lookup(LEVEL_ENV_VAR) {
            match value.parse() {
                Ok(level) => self.default_level = level,
                Err(e) => warn!("Ignoring {LEVEL_ENV_VAR}: {e}"),
            }
        }
        if let Some(value) = lookup(MISMATCH_POLICY_ENV_VAR) {
            match value.parse() {
                Ok(policy) => self.mismatch_policy = policy,
                Err(e) => warn!("Ignoring {MISMATCH_POLICY_ENV_VAR}: {e}"),
            }
        }
        if let Some(value) = lookup(MAX_PAYLOAD_ENV_VAR) {
            match value.parse() {
                Ok(limit) => self.max_payload_bytes = limit,
                Err(e) => warn!("Ignoring {MAX_PAYLOAD_ENV_VAR}: {e}"),
            }
        }
        self
    }

    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.default_method = method;
        self
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    /// Pretend an optional codec is not installed
    pub fn without_codec(mut self, method: CompressionMethod) -> Self {
        if !self.disabled_codecs.contains(&method) {
            self.disabled_codecs.push(method);
        }
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    pub fn with_max_operations(mut self, limit: usize) -> Self {
        self.max_operations = limit;
        self
    }

    pub fn with_max_rle_elements(mut self, limit: usize) -> Self {
        self.max_rle_elements = limit;
        self
    }
}
