//! State synchronization for Statewire
//!
//! Delivers nested application state to many clients with as few bytes as
//! possible: a full snapshot on first contact, path-based deltas against a
//! per-client baseline afterwards, and a choice of byte-level codecs on top.

pub mod cache;
pub mod compress;
pub mod config;
pub mod delta;
pub mod diff;
pub mod metadata;
pub mod network;
pub mod optimize;
pub mod registry;
pub mod snapshot;

pub use cache::ClientStateCache;
pub use compress::{ByteCodec, CompressionLevel, CompressionMethod};
pub use config::{MismatchPolicy, SyncConfig};
pub use delta::DeltaEngine;
pub use diff::{DeltaMessage, DeltaOperation, DeltaPath};
pub use metadata::{Metadata, MethodTag};
pub use network::{Envelope, NetworkCodec};
pub use optimize::MessageOptimizer;
pub use registry::CodecRegistry;
pub use snapshot::Snapshot;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Delta compression requires a client id")]
    MissingClientId,

    #[error("No baseline cached for client {0}")]
    MissingBaseline(String),

    #[error("Baseline mismatch for client {client_id}: expected {expected}, got {actual}")]
    BaselineMismatch {
        client_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("{what} exceeded limit: {size} > {limit}")]
    LimitExceeded {
        what: &'static str,
        size: usize,
        limit: usize,
    },
}
