//! Snapshot serialization and fingerprinting

use crate::StateError;
use serde::Serialize;
use serde_json::{Map, Value};

/// A point-in-time view of application state
pub type Snapshot = Map<String, Value>;

/// Number of digest bytes kept in a baseline fingerprint
pub const HASH_PRECISION: usize = 8;

/// Serialize a value to its canonical JSON bytes.
///
/// Object keys are kept sorted by `serde_json::Map`, so equal values always
/// produce identical bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec(value).map_err(|e| StateError::Serialization(e.to_string()))
}

/// Parse JSON payload bytes back into a value
pub fn from_bytes(bytes: &[u8]) -> Result<Value, StateError> {
    serde_json::from_slice(bytes).map_err(|e| StateError::MalformedPayload(e.to_string()))
}

/// Cheap content hash used to detect baseline mismatches.
///
/// Not an integrity check: only the first [`HASH_PRECISION`] bytes of the
/// digest are kept.
pub fn content_hash(value: &Value) -> Result<String, StateError> {
    let bytes = canonical_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    let digest = blake3::hash(bytes);
    digest.as_bytes()[..HASH_PRECISION]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Reject payloads above `limit` bytes
pub(crate) fn check_size(what: &'static str, size: usize, limit: usize) -> Result<(), StateError> {
    if size > limit {
        return Err(StateError::LimitExceeded { what, size, limit });
    }
    Ok(())
}
