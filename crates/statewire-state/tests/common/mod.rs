#![allow(dead_code)]

use proptest::prelude::*;
use serde_json::Value;
use statewire_state::{ClientStateCache, NetworkCodec, SyncConfig};
use std::sync::Arc;

/// A sender and a receiver, each with its own baseline cache
pub struct Peers {
    pub sender: NetworkCodec,
    pub receiver: NetworkCodec,
}

impl Peers {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            sender: NetworkCodec::new(Arc::new(ClientStateCache::new()), config),
            receiver: NetworkCodec::new(Arc::new(ClientStateCache::new()), config),
        }
    }
}

/// JSON values without nulls; small integers are common so runs show up
pub fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        3 => (0i64..3).prop_map(Value::from),
        1 => any::<i64>().prop_map(Value::from),
        1 => (-1.0e6f64..1.0e6).prop_map(Value::from),
        1 => "[a-z]{0,6}".prop_map(Value::from),
        1 => any::<bool>().prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 48, 12, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..14).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,5}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Top-level mappings, as fed to the delta engine
pub fn arb_snapshot() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-d]", arb_value(), 0..5)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}
