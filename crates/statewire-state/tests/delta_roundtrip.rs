mod common;

use common::{arb_snapshot, Peers};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use statewire_state::{
    ClientStateCache, CodecRegistry, CompressionLevel, CompressionMethod, DeltaMessage,
    DeltaOperation, SyncConfig,
};
use statewire_test_utils::fixtures::data;
use std::sync::Arc;

fn registries() -> (CodecRegistry, CodecRegistry) {
    let config = SyncConfig::default();
    (
        CodecRegistry::new(Arc::new(ClientStateCache::new()), &config),
        CodecRegistry::new(Arc::new(ClientStateCache::new()), &config),
    )
}

#[test]
fn first_contact_then_single_field_delta() {
    statewire_test_utils::init_test_logging();
    let (sender, receiver) = registries();

    let first = json!({"score": 0, "level": 1});
    let (bytes, metadata) = sender
        .compress(&first, CompressionMethod::Delta, CompressionLevel::Balanced, Some("c1"))
        .unwrap();
    assert!(!metadata.delta);
    assert_eq!(receiver.decompress(&bytes, &metadata, Some("c1")).unwrap(), first);

    let second = json!({"score": 10, "level": 1});
    let (bytes, metadata) = sender
        .compress(&second, CompressionMethod::Delta, CompressionLevel::Balanced, Some("c1"))
        .unwrap();
    assert!(metadata.delta);
    assert_eq!(
        DeltaMessage::from_bytes(&bytes).unwrap().operations,
        vec![DeltaOperation::set("score", 10)]
    );
    assert_eq!(receiver.decompress(&bytes, &metadata, Some("c1")).unwrap(), second);
}

#[test]
fn nested_field_delta() {
    let (sender, _) = registries();
    let method = CompressionMethod::Delta;
    let level = CompressionLevel::Balanced;

    sender
        .compress(&json!({"player": {"x": 1, "y": 2}}), method, level, Some("c1"))
        .unwrap();
    let (bytes, _) = sender
        .compress(&json!({"player": {"x": 1, "y": 5}}), method, level, Some("c1"))
        .unwrap();

    assert_eq!(
        DeltaMessage::from_bytes(&bytes).unwrap().operations,
        vec![DeltaOperation::set("player.y", 5)]
    );
}

#[test]
fn every_method_roundtrips_a_session() {
    statewire_test_utils::init_test_logging();
    let session = data::game_session(12);

    for method in CompressionMethod::ALL {
        let peers = Peers::new(&SyncConfig::default());
        for (tick, state) in session.iter().enumerate() {
            let envelope = peers
                .sender
                .encode_with(state, method, CompressionLevel::Balanced, Some("c1"))
                .unwrap();
            let decoded = peers
                .receiver
                .decode_from_network(&envelope, Some("c1"))
                .unwrap();
            assert_eq!(&decoded, state, "{method} at tick {tick}");
        }
    }
}

#[test]
fn deltas_are_smaller_than_snapshots() {
    let peers = Peers::new(&SyncConfig::default());
    let session = data::game_session(5);

    let mut sizes = Vec::new();
    for state in &session {
        let envelope = peers
            .sender
            .encode_with(state, CompressionMethod::Delta, CompressionLevel::Balanced, Some("c1"))
            .unwrap();
        sizes.push((envelope.metadata.delta, envelope.metadata.compressed_size));
        peers.receiver.decode_from_network(&envelope, Some("c1")).unwrap();
    }

    let (first_is_delta, full_size) = sizes[0];
    assert!(!first_is_delta);
    for (is_delta, size) in &sizes[1..] {
        assert!(is_delta);
        assert!(*size < full_size);
    }
}

#[test]
fn independent_clients_keep_independent_baselines() {
    let peers = Peers::new(&SyncConfig::default());
    let a = json!({"owner": "a", "n": 1});
    let b = json!({"owner": "b", "n": 1});

    for (client, state) in [("a", &a), ("b", &b)] {
        let envelope = peers.sender.encode_for_network(state, Some(client)).unwrap();
        peers.receiver.decode_from_network(&envelope, Some(client)).unwrap();
    }

    let next_a = json!({"owner": "a", "n": 2});
    let envelope = peers.sender.encode_for_network(&next_a, Some("a")).unwrap();
    assert!(envelope.metadata.delta);
    assert_eq!(
        peers.receiver.decode_from_network(&envelope, Some("a")).unwrap(),
        next_a
    );

    let cache = peers.receiver.registry().delta_engine().cache();
    assert_eq!(cache.get("b"), Some(b));
    assert_eq!(cache.client_ids(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn random_mutation_chain_roundtrips() {
    let peers = Peers::new(&SyncConfig::default());
    let mut state = data::random_snapshot(11);

    for seed in 0..50 {
        let envelope = peers.sender.encode_for_network(&state, Some("m")).unwrap();
        assert_eq!(envelope.metadata.delta, seed > 0);
        assert_eq!(
            peers.receiver.decode_from_network(&envelope, Some("m")).unwrap(),
            state
        );
        state = data::mutate(&state, seed);
    }
}

proptest! {
    #[test]
    fn delta_chain_reconstructs_every_snapshot(
        snapshots in prop::collection::vec(arb_snapshot(), 1..8)
    ) {
        let (sender, receiver) = registries();
        for snapshot in &snapshots {
            let (bytes, metadata) = sender
                .compress(snapshot, CompressionMethod::Hybrid, CompressionLevel::Fast, Some("p"))
                .unwrap();
            let decoded = receiver.decompress(&bytes, &metadata, Some("p")).unwrap();
            prop_assert_eq!(&decoded, snapshot);
        }
    }

    #[test]
    fn identical_snapshot_yields_no_operations(snapshot in arb_snapshot()) {
        let (sender, _) = registries();
        let method = CompressionMethod::Delta;
        let level = CompressionLevel::Balanced;
        sender.compress(&snapshot, method, level, Some("p")).unwrap();

        let (bytes, metadata) = sender.compress(&snapshot, method, level, Some("p")).unwrap();
        prop_assert!(metadata.delta);
        prop_assert!(DeltaMessage::from_bytes(&bytes).unwrap().operations.is_empty());
    }
}
