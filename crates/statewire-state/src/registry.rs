//! Compression method dispatch
//!
//! Optional codecs are probed once when the registry is built. Dispatch is a
//! table lookup afterwards: a method missing from the table resolves to the
//! zlib codec, and the metadata names the codec actually used.

use crate::{
    cache::ClientStateCache,
    compress::{create_codec, ByteCodec, CompressionLevel, CompressionMethod, ZlibCodec},
    config::SyncConfig,
    delta::DeltaEngine,
    metadata::{Metadata, MethodTag},
    snapshot::{self, check_size},
    StateError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Codec every build carries, used whenever another codec is unavailable
pub const DEFAULT_CODEC: CompressionMethod = CompressionMethod::Zlib;

/// Dispatches compression to byte codecs or to the delta engine
pub struct CodecRegistry {
    codecs: BTreeMap<CompressionMethod, Box<dyn ByteCodec>>,
    fallback: ZlibCodec,
    delta: DeltaEngine,
    max_payload_bytes: usize,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .field("delta", &self.delta)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

impl CodecRegistry {
    /// Probe available codecs and build the dispatch table
    pub fn new(cache: Arc<ClientStateCache>, config: &SyncConfig) -> Self {
        let codecs: BTreeMap<_, _> = CompressionMethod::ALL
            .into_iter()
            .filter(|m| m.is_generic())
            .filter(|m| !(m.is_optional() && config.disabled_codecs.contains(m)))
            .filter_map(|m| create_codec(m).map(|codec| (m, codec)))
            .collect();

        info!(
            "Compression codecs available: {}",
            codecs
                .keys()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            codecs,
            fallback: ZlibCodec,
            delta: DeltaEngine::new(cache, config),
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    /// The delta engine used for DELTA and HYBRID
    pub fn delta_engine(&self) -> &DeltaEngine {
        &self.delta
    }

    /// Whether `method` can be served without falling back
    pub fn is_available(&self, method: CompressionMethod) -> bool {
        !method.is_generic() || self.codecs.contains_key(&method)
    }

    /// All methods this registry can serve without falling back
    pub fn available_methods(&self) -> Vec<CompressionMethod> {
        CompressionMethod::ALL
            .into_iter()
            .filter(|m| self.is_available(*m))
            .collect()
    }

    /// Advisory method for a payload of `size` bytes
    pub fn optimal_method(&self, size: usize) -> CompressionMethod {
        let suggested = match size {
            0..=99 => CompressionMethod::None,
            100..=999 => CompressionMethod::Zlib,
            1_000..=9_999 => CompressionMethod::Gzip,
            10_000..=99_999 => CompressionMethod::Zstd,
            _ => CompressionMethod::Brotli,
        };
        if self.is_available(suggested) {
            suggested
        } else {
            DEFAULT_CODEC
        }
    }

    fn resolve(&self, method: CompressionMethod) -> &dyn ByteCodec {
        match self.codecs.get(&method) {
            Some(codec) => codec.as_ref(),
            None => {
                warn!("{} codec not available, falling back to {}", method, DEFAULT_CODEC);
                &self.fallback
            }
        }
    }

    /// Compress raw bytes with a byte-level method.
    ///
    /// Returns the method actually used, which differs from `method` when
    /// the requested codec is unavailable. DELTA and HYBRID are not byte-level
    /// methods and use the default codec here.
    pub fn compress_bytes(
        &self,
        data: &[u8],
        method: CompressionMethod,
        level: CompressionLevel,
    ) -> Result<(CompressionMethod, Vec<u8>), StateError> {
        check_size("payload", data.len(), self.max_payload_bytes)?;
        match method {
            CompressionMethod::None => Ok((CompressionMethod::None, data.to_vec())),
            CompressionMethod::Delta | CompressionMethod::Hybrid => {
                Ok((DEFAULT_CODEC, self.fallback.compress(data, level)?))
            }
            generic => {
                let codec = self.resolve(generic);
                let compressed = codec.compress(data, level)?;
                Ok((codec.method(), compressed))
            }
        }
    }

    /// Undo [`CodecRegistry::compress_bytes`]
    pub fn decompress_bytes(
        &self,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<Vec<u8>, StateError> {
        check_size("payload", data.len(), self.max_payload_bytes)?;
        match method {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Delta | CompressionMethod::Hybrid => {
                self.fallback.decompress(data, self.max_payload_bytes)
            }
            generic => self.resolve(generic).decompress(data, self.max_payload_bytes),
        }
    }

    /// Serialize and compress a value.
    ///
    /// DELTA requires a client id. HYBRID sends a compressed delta when the
    /// client already has a baseline; otherwise it records the baseline (when
    /// it can) and compresses the full payload with the default codec,
    /// reporting that codec as the method.
    pub fn compress(
        &self,
        value: &Value,
        method: CompressionMethod,
        level: CompressionLevel,
        client_id: Option<&str>,
    ) -> Result<(Vec<u8>, Metadata), StateError> {
        match method {
            CompressionMethod::Delta => {
                let client_id = client_id.ok_or(StateError::MissingClientId)?;
                self.delta.encode(client_id, value)
            }
            CompressionMethod::Hybrid => self.compress_hybrid(value, level, client_id),
            _ => {
                let json = snapshot::canonical_bytes(value)?;
                let (used, compressed) = self.compress_bytes(&json, method, level)?;
                let metadata = Metadata::new(used, json.len(), compressed.len()).with_level(level);
                Ok((compressed, metadata))
            }
        }
    }

    fn compress_hybrid(
        &self,
        value: &Value,
        level: CompressionLevel,
        client_id: Option<&str>,
    ) -> Result<(Vec<u8>, Metadata), StateError> {
        if let Some(id) = client_id {
            let encoded = self.delta.encode_then(id, value, |bytes, mut metadata| {
                let compressed = self.fallback.compress(&bytes, level)?;
                metadata.level = Some(level);
                if metadata.delta {
                    metadata.method = MethodTag::Known(CompressionMethod::Hybrid);
                } else {
                    // First contact: the full payload goes out under the codec's own name
                    metadata.method = MethodTag::Known(DEFAULT_CODEC);
                }
                metadata.set_compressed_size(compressed.len());
                Ok((compressed, metadata))
            });

            match encoded {
                Err(StateError::InvalidSnapshot(reason)) => {
                    debug!(
                        "Delta encoding unavailable in hybrid compression: {}, falling back to {}",
                        reason, DEFAULT_CODEC
                    );
                }
                other => return other,
            }
        }

        let json = snapshot::canonical_bytes(value)?;
        let (used, compressed) = self.compress_bytes(&json, DEFAULT_CODEC, level)?;
        let metadata = Metadata::new(used, json.len(), compressed.len()).with_level(level);
        Ok((compressed, metadata))
    }

    /// Decompress a payload described by `metadata`.
    ///
    /// Unknown method names fall back to the default codec with a warning.
    /// Full payloads whose metadata names a client seed that client's baseline.
    pub fn decompress(
        &self,
        data: &[u8],
        metadata: &Metadata,
        client_id: Option<&str>,
    ) -> Result<Value, StateError> {
        let method = match &metadata.method {
            MethodTag::Known(method) => *method,
            MethodTag::Unknown(name) => {
                warn!(
                    "Unknown compression method {}, falling back to {}",
                    name, DEFAULT_CODEC
                );
                DEFAULT_CODEC
            }
        };

        match method {
            CompressionMethod::Delta => self.delta.decode(client_id, data, metadata),
            CompressionMethod::Hybrid => {
                let inner = self.fallback.decompress(data, self.max_payload_bytes)?;
                if metadata.delta {
                    self.delta.decode(client_id, &inner, metadata)
                } else {
                    self.decode_full(&inner, metadata, client_id)
                }
            }
            _ => {
                if metadata.delta {
                    return Err(StateError::MalformedPayload(format!(
                        "{method} payload flagged as delta"
                    )));
                }
                let raw = self.decompress_bytes(data, method)?;
                self.decode_full(&raw, metadata, client_id)
            }
        }
    }

    fn decode_full(
        &self,
        raw: &[u8],
        metadata: &Metadata,
        client_id: Option<&str>,
    ) -> Result<Value, StateError> {
        // Only payloads the sender recorded as a baseline seed the receiver
        match metadata.client_id.as_deref() {
            Some(sender_id) => self
                .delta
                .decode(Some(client_id.unwrap_or(sender_id)), raw, metadata),
            None => {
                check_size("payload", raw.len(), self.max_payload_bytes)?;
                snapshot::from_bytes(raw)
            }
        }
    }
}
