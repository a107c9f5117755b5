//! Network envelopes
//!
//! Wraps compressed payloads in base64 together with their metadata, for
//! single snapshots and for batches sent as one payload.

use crate::{
    cache::ClientStateCache,
    compress::{CompressionLevel, CompressionMethod},
    config::SyncConfig,
    metadata::{timestamp_now, Metadata},
    registry::CodecRegistry,
    StateError,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Wire envelope produced by [`NetworkCodec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 of the compressed payload
    pub data: String,
    pub metadata: Metadata,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub batch: bool,
    /// Number of messages in a batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Envelope {
    /// Serialize envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(bytes).map_err(|e| StateError::MalformedPayload(e.to_string()))
    }

    fn payload(&self) -> Result<Vec<u8>, StateError> {
        general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| StateError::MalformedPayload(format!("Invalid base64 payload: {e}")))
    }
}

/// Outer framing API over the codec registry
#[derive(Debug)]
pub struct NetworkCodec {
    registry: CodecRegistry,
    cache: Arc<ClientStateCache>,
    method: CompressionMethod,
    level: CompressionLevel,
}

impl NetworkCodec {
    /// Create a codec sharing `cache` with any other codec in the process
    pub fn new(cache: Arc<ClientStateCache>, config: &SyncConfig) -> Self {
        Self {
            registry: CodecRegistry::new(cache.clone(), config),
            cache,
            method: config.default_method,
            level: config.default_level,
        }
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Encode a snapshot with the configured method and level
    pub fn encode_for_network(
        &self,
        snapshot: &Value,
        client_id: Option<&str>,
    ) -> Result<Envelope, StateError> {
        self.encode_with(snapshot, self.method, self.level, client_id)
    }

    /// Encode a snapshot with an explicit method and level
    pub fn encode_with(
        &self,
        snapshot: &Value,
        method: CompressionMethod,
        level: CompressionLevel,
        client_id: Option<&str>,
    ) -> Result<Envelope, StateError> {
        let (compressed, metadata) = self.registry.compress(snapshot, method, level, client_id)?;
        Ok(Envelope {
            data: general_purpose::STANDARD.encode(compressed),
            metadata,
            timestamp: timestamp_now(),
            batch: false,
            count: None,
        })
    }

    /// Decode an envelope produced by [`NetworkCodec::encode_for_network`]
    pub fn decode_from_network(
        &self,
        envelope: &Envelope,
        client_id: Option<&str>,
    ) -> Result<Value, StateError> {
        let compressed = envelope.payload()?;
        self.registry
            .decompress(&compressed, &envelope.metadata, client_id)
    }

    /// Compress a sequence of messages as one payload, with the configured
    /// method and level
    pub fn batch_compress(
        &self,
        messages: &[Value],
        client_id: Option<&str>,
    ) -> Result<Envelope, StateError> {
        self.batch_compress_with(messages, self.method, self.level, client_id)
    }

    /// Compress a sequence of messages as one payload with an explicit method
    /// and level
    pub fn batch_compress_with(
        &self,
        messages: &[Value],
        method: CompressionMethod,
        level: CompressionLevel,
        client_id: Option<&str>,
    ) -> Result<Envelope, StateError> {
        let batch = Value::Array(messages.to_vec());
        let mut envelope = self.encode_with(&batch, method, level, client_id)?;
        envelope.batch = true;
        envelope.count = Some(messages.len());

        debug!(
            "Batched {} messages: {} -> {} bytes",
            messages.len(),
            envelope.metadata.original_size,
            envelope.metadata.compressed_size
        );
        Ok(envelope)
    }

    /// Undo [`NetworkCodec::batch_compress`]
    pub fn batch_decompress(
        &self,
        envelope: &Envelope,
        client_id: Option<&str>,
    ) -> Result<Vec<Value>, StateError> {
        if !envelope.batch {
            return Err(StateError::MalformedPayload(
                "envelope is not a batch".to_string(),
            ));
        }

        let messages = match self.decode_from_network(envelope, client_id)? {
            Value::Array(messages) => messages,
            other => {
                return Err(StateError::MalformedPayload(format!(
                    "batch payload is not a sequence: {other}"
                )))
            }
        };

        match envelope.count {
            Some(count) if count != messages.len() => Err(StateError::MalformedPayload(format!(
                "batch count mismatch: envelope says {count}, payload has {}",
                messages.len()
            ))),
            _ => Ok(messages),
        }
    }

    /// Forget a client's baseline, or every baseline when `None`.
    ///
    /// Connection teardown calls this for a disconnecting client.
    pub fn clear_client(&self, client_id: Option<&str>) {
        self.cache.clear(client_id);
    }
}
