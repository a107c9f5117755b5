//! State diffing algorithm for efficient synchronization
//!
//! Diffs are shallow on purpose: top-level keys are compared, and when both
//! sides of a changed key are mappings the comparison goes exactly one level
//! further. Anything that differs below depth two is replaced wholesale.

use crate::snapshot::Snapshot;
use crate::StateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Location of a value inside a snapshot: one or two key segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct DeltaPath {
    pub key: String,
    pub sub: Option<String>,
}

impl DeltaPath {
    /// Path to a top-level key
    pub fn top(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sub: None,
        }
    }

    /// Path to a key inside a top-level mapping
    pub fn nested(key: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sub: Some(sub.into()),
        }
    }

    /// Parse a dot-joined path, splitting on the first dot only
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((key, sub)) => Self::nested(key, sub),
            None => Self::top(path),
        }
    }
}

impl fmt::Display for DeltaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}.{}", self.key, sub),
            None => f.write_str(&self.key),
        }
    }
}

impl From<DeltaPath> for Vec<String> {
    fn from(path: DeltaPath) -> Self {
        match path.sub {
            Some(sub) => vec![path.key, sub],
            None => vec![path.key],
        }
    }
}

impl TryFrom<Vec<String>> for DeltaPath {
    type Error = String;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        let mut segments = segments.into_iter();
        match (segments.next(), segments.next(), segments.next()) {
            (Some(key), sub, None) => Ok(Self { key, sub }),
            _ => Err("delta path must have one or two segments".to_string()),
        }
    }
}

/// A single change to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum DeltaOperation {
    #[serde(rename = "set")]
    Set { path: DeltaPath, value: Value },
    #[serde(rename = "del")]
    Delete { path: DeltaPath },
}

impl DeltaOperation {
    /// `Set` at a dot-joined path
    pub fn set(path: &str, value: impl Into<Value>) -> Self {
        DeltaOperation::Set {
            path: DeltaPath::parse(path),
            value: value.into(),
        }
    }

    /// `Delete` at a dot-joined path
    pub fn delete(path: &str) -> Self {
        DeltaOperation::Delete {
            path: DeltaPath::parse(path),
        }
    }

    pub fn path(&self) -> &DeltaPath {
        match self {
            DeltaOperation::Set { path, .. } | DeltaOperation::Delete { path } => path,
        }
    }
}

/// Operations valid only against the baseline whose hash is `baseline_hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(rename = "ops")]
    pub operations: Vec<DeltaOperation>,
    #[serde(rename = "hash")]
    pub baseline_hash: String,
}

impl DeltaMessage {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(bytes).map_err(|e| StateError::MalformedPayload(e.to_string()))
    }
}

/// Generate the operations turning `old` into `new`.
///
/// Operations come out in key order, so equal inputs always give equal diffs.
pub fn generate(old: &Snapshot, new: &Snapshot) -> Vec<DeltaOperation> {
    let mut operations = Vec::new();

    for key in union_keys(old, new) {
        match (old.get(key), new.get(key)) {
            (Some(_), None) => operations.push(DeltaOperation::Delete {
                path: DeltaPath::top(key),
            }),
            (None, Some(value)) => operations.push(DeltaOperation::Set {
                path: DeltaPath::top(key),
                value: value.clone(),
            }),
            (Some(before), Some(after)) if before != after => {
                match (before.as_object(), after.as_object()) {
                    (Some(before), Some(after)) => {
                        generate_nested(key, before, after, &mut operations)
                    }
                    _ => operations.push(DeltaOperation::Set {
                        path: DeltaPath::top(key),
                        value: after.clone(),
                    }),
                }
            }
            _ => {}
        }
    }

    operations
}

fn generate_nested(
    key: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    operations: &mut Vec<DeltaOperation>,
) {
    for sub in union_keys(old, new) {
        match (old.get(sub), new.get(sub)) {
            (Some(_), None) => operations.push(DeltaOperation::Delete {
                path: DeltaPath::nested(key, sub),
            }),
            (None, Some(value)) => operations.push(DeltaOperation::Set {
                path: DeltaPath::nested(key, sub),
                value: value.clone(),
            }),
            (Some(before), Some(after)) if before != after => {
                operations.push(DeltaOperation::Set {
                    path: DeltaPath::nested(key, sub),
                    value: after.clone(),
                })
            }
            _ => {}
        }
    }
}

fn union_keys<'a>(old: &'a Map<String, Value>, new: &'a Map<String, Value>) -> BTreeSet<&'a str> {
    old.keys().chain(new.keys()).map(String::as_str).collect()
}

/// Apply operations to a copy of `base`.
///
/// Deleting a missing key is a no-op. Setting a nested path creates the
/// parent mapping when it is missing, or replaces it when it is not a mapping.
pub fn apply(base: &Snapshot, operations: &[DeltaOperation]) -> Snapshot {
    let mut state = base.clone();

    for operation in operations {
        match operation {
            DeltaOperation::Set { path, value } => match &path.sub {
                None => {
                    state.insert(path.key.clone(), value.clone());
                }
                Some(sub) => {
                    let parent = state
                        .entry(path.key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !parent.is_object() {
                        *parent = Value::Object(Map::new());
                    }
                    if let Value::Object(parent) = parent {
                        parent.insert(sub.clone(), value.clone());
                    }
                }
            },
            DeltaOperation::Delete { path } => match &path.sub {
                None => {
                    state.remove(&path.key);
                }
                Some(sub) => {
                    if let Some(Value::Object(parent)) = state.get_mut(&path.key) {
                        parent.remove(sub);
                    }
                }
            },
        }
    }

    state
}
