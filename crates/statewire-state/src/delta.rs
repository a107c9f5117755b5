//! Delta encoding against per-client baselines
//!
//! The first encode for a client ships the full snapshot and records it as
//! that client's baseline. Every later encode ships only the operations that
//! turn the baseline into the new snapshot, tagged with the baseline's hash.

use crate::{
    cache::ClientStateCache,
    compress::CompressionMethod,
    config::{MismatchPolicy, SyncConfig},
    diff::{self, DeltaMessage},
    metadata::Metadata,
    snapshot::{self, check_size},
    StateError,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Computes and applies deltas, reading and updating the baseline cache
#[derive(Debug, Clone)]
pub struct DeltaEngine {
    cache: Arc<ClientStateCache>,
    mismatch_policy: MismatchPolicy,
    max_payload_bytes: usize,
    max_operations: usize,
}

impl DeltaEngine {
    /// Create an engine over a shared cache
    pub fn new(cache: Arc<ClientStateCache>, config: &SyncConfig) -> Self {
        Self {
            cache,
            mismatch_policy: config.mismatch_policy,
            max_payload_bytes: config.max_payload_bytes,
            max_operations: config.max_operations,
        }
    }

    /// The baseline cache this engine reads and writes
    pub fn cache(&self) -> &Arc<ClientStateCache> {
        &self.cache
    }

    /// How decode treats a baseline hash mismatch
    pub fn mismatch_policy(&self) -> MismatchPolicy {
        self.mismatch_policy
    }

    /// Encode `snapshot` for `client_id`.
    ///
    /// Returns the full snapshot with `delta == false` on first contact, and a
    /// serialized [`DeltaMessage`] with `delta == true` afterwards. The new
    /// snapshot becomes the client's baseline only once encoding succeeded.
    pub fn encode(
        &self,
        client_id: &str,
        snapshot: &Value,
    ) -> Result<(Vec<u8>, Metadata), StateError> {
        self.encode_then(client_id, snapshot, |bytes, metadata| Ok((bytes, metadata)))
    }

    /// Like [`DeltaEngine::encode`], but runs `finish` on the encoded payload
    /// inside the client's critical section. The baseline is committed only
    /// if `finish` succeeds.
    pub fn encode_then<F>(
        &self,
        client_id: &str,
        snapshot: &Value,
        finish: F,
    ) -> Result<(Vec<u8>, Metadata), StateError>
    where
        F: FnOnce(Vec<u8>, Metadata) -> Result<(Vec<u8>, Metadata), StateError>,
    {
        let new_state = snapshot.as_object().ok_or_else(|| {
            StateError::InvalidSnapshot("delta encoding needs a mapping at the top level".into())
        })?;
        let full_bytes = snapshot::canonical_bytes(snapshot)?;
        check_size("snapshot", full_bytes.len(), self.max_payload_bytes)?;
        let original_size = full_bytes.len();

        self.cache.with_baseline(client_id, |baseline| {
            let previous = match baseline.as_ref() {
                Some(Value::Object(previous)) => previous,
                _ => {
                    let mut metadata =
                        Metadata::new(CompressionMethod::Delta, original_size, original_size);
                    metadata.client_id = Some(client_id.to_string());
                    let encoded = finish(full_bytes, metadata)?;

                    debug!("First contact for client {}, sending full snapshot", client_id);
                    *baseline = Some(snapshot.clone());
                    return Ok(encoded);
                }
            };

            let baseline_hash = snapshot::hash_bytes(&snapshot::canonical_bytes(previous)?);
            let message = DeltaMessage {
                operations: diff::generate(previous, new_state),
                baseline_hash,
            };
            let bytes = message.to_bytes()?;

            debug!(
                "Delta for client {}: {} operations, {} -> {} bytes",
                client_id,
                message.operations.len(),
                original_size,
                bytes.len()
            );

            let mut metadata = Metadata::new(CompressionMethod::Delta, original_size, bytes.len());
            metadata.delta = true;
            metadata.operations = Some(message.operations.len());
            metadata.client_id = Some(client_id.to_string());
            metadata.base_hash = Some(message.baseline_hash);
            let encoded = finish(bytes, metadata)?;

            *baseline = Some(snapshot.clone());
            Ok(encoded)
        })
    }

    /// Decode a payload produced by [`DeltaEngine::encode`].
    ///
    /// The client id comes from `client_id` or, failing that, from the
    /// metadata. Full snapshots are returned as-is and become the client's
    /// baseline; deltas are applied to a copy of the cached baseline.
    pub fn decode(
        &self,
        client_id: Option<&str>,
        bytes: &[u8],
        metadata: &Metadata,
    ) -> Result<Value, StateError> {
        check_size("payload", bytes.len(), self.max_payload_bytes)?;
        let client_id = client_id.or(metadata.client_id.as_deref());

        if !metadata.delta {
            let value = snapshot::from_bytes(bytes)?;
            if let Some(id) = client_id {
                if value.is_object() {
                    self.cache.put(id, value.clone());
                }
            }
            return Ok(value);
        }

        let client_id = client_id.ok_or(StateError::MissingClientId)?;
        let message = DeltaMessage::from_bytes(bytes)?;
        check_size(
            "delta operations",
            message.operations.len(),
            self.max_operations,
        )?;
        let expected = metadata
            .base_hash
            .as_deref()
            .unwrap_or(&message.baseline_hash);

        self.cache.with_baseline(client_id, |baseline| {
            let current = match baseline.as_ref() {
                Some(Value::Object(current)) => current,
                _ => return Err(StateError::MissingBaseline(client_id.to_string())),
            };

            let actual = snapshot::hash_bytes(&snapshot::canonical_bytes(current)?);
            if actual != expected {
                warn!(
                    "Baseline hash mismatch for client {}: expected {}, got {}",
                    client_id, expected, actual
                );
                if self.mismatch_policy == MismatchPolicy::Strict {
                    return Err(StateError::BaselineMismatch {
                        client_id: client_id.to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }

            let result = Value::Object(diff::apply(current, &message.operations));
            *baseline = Some(result.clone());
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DeltaOperation, DeltaPath};
    use serde_json::json;

    fn engine(policy: MismatchPolicy) -> DeltaEngine {
        DeltaEngine::new(
            Arc::new(ClientStateCache::new()),
            &SyncConfig::default().with_mismatch_policy(policy),
        )
    }

    #[test]
    fn test_first_contact_sends_full_snapshot() {
        let sender = engine(MismatchPolicy::Strict);
        let receiver = engine(MismatchPolicy::Strict);
        let state = json!({"score": 0, "level": 1});

        let (bytes, metadata) = sender.encode("c1", &state).unwrap();

        assert!(!metadata.delta);
        assert_eq!(metadata.client_id.as_deref(), Some("c1"));
        assert_eq!(metadata.base_hash, None);
        assert_eq!(sender.cache().get("c1"), Some(state.clone()));
        assert_eq!(receiver.decode(Some("c1"), &bytes, &metadata).unwrap(), state);
        assert_eq!(receiver.cache().get("c1"), Some(state));
    }

    #[test]
    fn test_score_change_is_single_set() {
        let sender = engine(MismatchPolicy::Strict);
        let receiver = engine(MismatchPolicy::Strict);
        let first = json!({"score": 0, "level": 1});
        let second = json!({"score": 10, "level": 1});

        let (bytes, metadata) = sender.encode("c1", &first).unwrap();
        receiver.decode(Some("c1"), &bytes, &metadata).unwrap();

        let (bytes, metadata) = sender.encode("c1", &second).unwrap();
        assert!(metadata.delta);
        assert_eq!(metadata.operations, Some(1));

        let message = DeltaMessage::from_bytes(&bytes).unwrap();
        assert_eq!(message.operations, vec![DeltaOperation::set("score", 10)]);
        assert_eq!(receiver.decode(Some("c1"), &bytes, &metadata).unwrap(), second);
    }

    #[test]
    fn test_nested_change() {
        let sender = engine(MismatchPolicy::Strict);
        sender.encode("c1", &json!({"player": {"x": 1, "y": 2}})).unwrap();

        let (bytes, _) = sender.encode("c1", &json!({"player": {"x": 1, "y": 5}})).unwrap();
        let message = DeltaMessage::from_bytes(&bytes).unwrap();

        assert_eq!(
            message.operations,
            vec![DeltaOperation::Set {
                path: DeltaPath::nested("player", "y"),
                value: json!(5)
            }]
        );
    }

    #[test]
    fn test_identical_snapshot_yields_no_operations() {
        let sender = engine(MismatchPolicy::Strict);
        let state = json!({"a": [1, 2, 3], "b": {"c": true}});
        sender.encode("c1", &state).unwrap();

        let (bytes, metadata) = sender.encode("c1", &state).unwrap();
        assert!(metadata.delta);
        assert!(DeltaMessage::from_bytes(&bytes).unwrap().operations.is_empty());
    }

    #[test]
    fn test_missing_baseline() {
        let sender = engine(MismatchPolicy::Strict);
        let receiver = engine(MismatchPolicy::Strict);
        sender.encode("c1", &json!({"a": 1})).unwrap();
        let (bytes, metadata) = sender.encode("c1", &json!({"a": 2})).unwrap();

        let result = receiver.decode(Some("c1"), &bytes, &metadata);
        assert!(matches!(result, Err(StateError::MissingBaseline(id)) if id == "c1"));
        assert!(receiver.cache().is_empty());
    }

    #[test]
    fn test_strict_mismatch_leaves_baseline_untouched() {
        let shared = engine(MismatchPolicy::Strict);
        assert_eq!(shared.mismatch_policy(), MismatchPolicy::Strict);
        shared.encode("c1", &json!({"a": 1})).unwrap();
        // Encoding already advanced the shared cache to {"a": 2}
        let (bytes, metadata) = shared.encode("c1", &json!({"a": 2, "b": 1})).unwrap();
        shared.cache().put("c1", json!({"a": 99}));

        let result = shared.decode(Some("c1"), &bytes, &metadata);
        assert!(matches!(result, Err(StateError::BaselineMismatch { .. })));
        assert_eq!(shared.cache().get("c1"), Some(json!({"a": 99})));
    }

    #[test]
    fn test_lenient_mismatch_applies_best_effort() {
        let shared = engine(MismatchPolicy::Lenient);
        assert_eq!(shared.mismatch_policy(), MismatchPolicy::Lenient);
        shared.encode("c1", &json!({"a": 1, "keep": 0})).unwrap();
        let (bytes, metadata) = shared.encode("c1", &json!({"a": 2, "keep": 0})).unwrap();
        shared.cache().put("c1", json!({"a": 99, "extra": true}));

        let decoded = shared.decode(Some("c1"), &bytes, &metadata).unwrap();
        assert_eq!(decoded, json!({"a": 2, "extra": true}));
        assert_eq!(shared.cache().get("c1"), Some(decoded));
    }

    #[test]
    fn test_replayed_delta_is_detected() {
        let sender = engine(MismatchPolicy::Strict);
        let receiver = engine(MismatchPolicy::Strict);
        let (bytes, metadata) = sender.encode("c1", &json!({"n": 1})).unwrap();
        receiver.decode(None, &bytes, &metadata).unwrap();

        let (bytes, metadata) = sender.encode("c1", &json!({"n": 2})).unwrap();

        assert_eq!(receiver.decode(None, &bytes, &metadata).unwrap(), json!({"n": 2}));
        assert!(matches!(
            receiver.decode(None, &bytes, &metadata),
            Err(StateError::BaselineMismatch { .. })
        ));
    }

    #[test]
    fn test_failed_finish_does_not_commit() {
        let sender = engine(MismatchPolicy::Strict);
        sender.encode("c1", &json!({"a": 1})).unwrap();

        let result = sender.encode_then("c1", &json!({"a": 2}), |_, _| {
            Err(StateError::Compression("codec went away".into()))
        });

        assert!(matches!(result, Err(StateError::Compression(_))));
        assert_eq!(sender.cache().get("c1"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_non_mapping_is_rejected_without_touching_cache() {
        let sender = engine(MismatchPolicy::Strict);
        let result = sender.encode("c1", &json!([1, 2, 3]));

        assert!(matches!(result, Err(StateError::InvalidSnapshot(_))));
        assert!(!sender.cache().contains("c1"));
    }

    #[test]
    fn test_operation_limit() {
        let sender = DeltaEngine::new(Arc::new(ClientStateCache::new()), &SyncConfig::default());
        let receiver = DeltaEngine::new(
            Arc::new(ClientStateCache::new()),
            &SyncConfig::default().with_max_operations(2),
        );

        let (bytes, metadata) = sender.encode("c1", &json!({})).unwrap();
        receiver.decode(Some("c1"), &bytes, &metadata).unwrap();
        let (bytes, metadata) = sender.encode("c1", &json!({"a": 1, "b": 2, "c": 3})).unwrap();

        assert!(matches!(
            receiver.decode(Some("c1"), &bytes, &metadata),
            Err(StateError::LimitExceeded { size: 3, limit: 2, .. })
        ));
    }
}
