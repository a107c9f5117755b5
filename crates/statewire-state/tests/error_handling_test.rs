mod common;

use common::Peers;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use statewire_state::{
    ClientStateCache, CompressionMethod, Envelope, MismatchPolicy, NetworkCodec, StateError,
    SyncConfig,
};
use statewire_test_utils::fixtures::data;
use statewire_test_utils::{LinkConditions, LossyLink};
use std::sync::Arc;

fn sync(peers: &Peers, state: &Value, client: &str) {
    let envelope = peers.sender.encode_for_network(state, Some(client)).unwrap();
    peers.receiver.decode_from_network(&envelope, Some(client)).unwrap();
}

#[test]
fn missed_delta_is_detected_and_leaves_receiver_untouched() {
    statewire_test_utils::init_test_logging();
    let peers = Peers::new(&SyncConfig::default());
    sync(&peers, &json!({"a": 1}), "c1");

    // Lost in transit
    peers
        .sender
        .encode_for_network(&json!({"a": 2}), Some("c1"))
        .unwrap();

    let envelope = peers
        .sender
        .encode_for_network(&json!({"a": 3}), Some("c1"))
        .unwrap();
    let result = peers.receiver.decode_from_network(&envelope, Some("c1"));

    assert!(matches!(result, Err(StateError::BaselineMismatch { .. })));
    let cache = peers.receiver.registry().delta_engine().cache();
    assert_eq!(cache.get("c1"), Some(json!({"a": 1})));
}

#[test]
fn lenient_receiver_applies_despite_mismatch() {
    let sender = NetworkCodec::new(Arc::new(ClientStateCache::new()), &SyncConfig::default());
    let receiver = NetworkCodec::new(
        Arc::new(ClientStateCache::new()),
        &SyncConfig::default().with_mismatch_policy(MismatchPolicy::Lenient),
    );

    let first = sender.encode_for_network(&json!({"a": 1, "b": 1}), Some("c1")).unwrap();
    receiver.decode_from_network(&first, Some("c1")).unwrap();
    sender.encode_for_network(&json!({"a": 2, "b": 1}), Some("c1")).unwrap();

    let third = sender.encode_for_network(&json!({"a": 2, "b": 2}), Some("c1")).unwrap();
    assert_eq!(
        receiver.decode_from_network(&third, Some("c1")).unwrap(),
        json!({"a": 1, "b": 2})
    );
}

#[test]
fn delta_without_baseline_is_reported() {
    let peers = Peers::new(&SyncConfig::default());
    peers
        .sender
        .encode_for_network(&json!({"a": 1}), Some("c1"))
        .unwrap();
    let delta = peers
        .sender
        .encode_for_network(&json!({"a": 2}), Some("c1"))
        .unwrap();

    assert!(matches!(
        peers.receiver.decode_from_network(&delta, Some("c1")),
        Err(StateError::MissingBaseline(id)) if id == "c1"
    ));
}

#[test]
fn unknown_method_name_falls_back_to_default_codec() {
    let peers = Peers::new(&SyncConfig::default());
    let envelope = peers
        .sender
        .encode_with(
            &json!({"a": 1}),
            CompressionMethod::Zlib,
            Default::default(),
            None,
        )
        .unwrap();

    let mut wire = serde_json::to_value(&envelope).unwrap();
    wire["metadata"]["method"] = json!("LZMA");
    let received: Envelope = serde_json::from_value(wire).unwrap();

    assert_eq!(received.metadata.known_method(), None);
    assert_eq!(
        peers.receiver.decode_from_network(&received, None).unwrap(),
        json!({"a": 1})
    );
}

#[test]
fn malformed_envelopes_are_rejected() {
    let peers = Peers::new(&SyncConfig::default());
    let envelope = peers
        .sender
        .encode_for_network(&json!({"a": 1}), None)
        .unwrap();

    let mut bad_base64 = envelope.clone();
    bad_base64.data = "%%%".to_string();
    assert!(matches!(
        peers.receiver.decode_from_network(&bad_base64, None),
        Err(StateError::MalformedPayload(_))
    ));

    let mut garbage = envelope.clone();
    garbage.data = "bm90IGNvbXByZXNzZWQ=".to_string();
    assert!(peers.receiver.decode_from_network(&garbage, None).is_err());

    assert!(matches!(
        Envelope::from_bytes(b"{\"data\": 1}"),
        Err(StateError::MalformedPayload(_))
    ));
}

#[test]
fn plain_payload_that_is_not_json() {
    let peers = Peers::new(&SyncConfig::default());
    let mut envelope = peers
        .sender
        .encode_with(
            &json!({"a": 1}),
            CompressionMethod::None,
            Default::default(),
            None,
        )
        .unwrap();
    envelope.data = "bm90IGpzb24=".to_string();

    assert!(matches!(
        peers.receiver.decode_from_network(&envelope, None),
        Err(StateError::MalformedPayload(_))
    ));
}

#[test]
fn oversized_payloads_are_refused() {
    let config = SyncConfig::default().with_max_payload_bytes(256);
    let codec = NetworkCodec::new(Arc::new(ClientStateCache::new()), &config);
    let big = json!({"blob": "x".repeat(1024)});

    assert!(matches!(
        codec.encode_for_network(&big, Some("c1")),
        Err(StateError::LimitExceeded { .. })
    ));
    assert!(!codec.registry().delta_engine().cache().contains("c1"));
}

#[test]
fn decompression_bomb_is_bounded() {
    let sender = NetworkCodec::new(Arc::new(ClientStateCache::new()), &SyncConfig::default());
    let receiver = NetworkCodec::new(
        Arc::new(ClientStateCache::new()),
        &SyncConfig::default().with_max_payload_bytes(4096),
    );
    let big = json!({"blob": "x".repeat(100_000)});

    let envelope = sender
        .encode_with(&big, CompressionMethod::Zlib, Default::default(), None)
        .unwrap();
    assert!(envelope.metadata.compressed_size < 4096);
    assert!(matches!(
        receiver.decode_from_network(&envelope, None),
        Err(StateError::LimitExceeded { .. })
    ));
}

#[test]
fn resync_over_lossy_link() {
    statewire_test_utils::init_test_logging();
    let peers = Peers::new(&SyncConfig::default());
    let mut link = LossyLink::new(LinkConditions::poor(), 0x5eed);
    let session = data::game_session(300);

    let mut resyncs = 0;
    for state in &session {
        let envelope = peers.sender.encode_for_network(state, Some("c1")).unwrap();
        for delivered in link.transmit(envelope) {
            match peers.receiver.decode_from_network(&delivered, Some("c1")) {
                Ok(decoded) => assert_eq!(&decoded, state),
                Err(StateError::BaselineMismatch { .. }) | Err(StateError::MissingBaseline(_)) => {
                    // Receiver asks for a fresh snapshot
                    peers.sender.clear_client(Some("c1"));
                    peers.receiver.clear_client(Some("c1"));
                    resyncs += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    assert!(link.dropped() > 0);
    assert!(resyncs > 0);

    // After a resync the next snapshot arrives in full and the chain resumes
    peers.sender.clear_client(Some("c1"));
    peers.receiver.clear_client(Some("c1"));
    let last = data::game_state(1_000);
    sync(&peers, &last, "c1");
    let next = data::game_state(1_001);
    let envelope = peers.sender.encode_for_network(&next, Some("c1")).unwrap();
    assert!(envelope.metadata.delta);
    assert_eq!(
        peers.receiver.decode_from_network(&envelope, Some("c1")).unwrap(),
        next
    );
}

#[test]
fn perfect_link_never_resyncs() {
    let peers = Peers::new(&SyncConfig::default());
    let mut link = LossyLink::new(LinkConditions::perfect(), 1);

    for state in data::game_session(50) {
        let envelope = peers.sender.encode_for_network(&state, Some("c1")).unwrap();
        let delivered = link.transmit(envelope);
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            peers.receiver.decode_from_network(&delivered[0], Some("c1")).unwrap(),
            state
        );
    }

    assert_eq!(link.sent(), 50);
    assert_eq!(link.dropped(), 0);
    assert_eq!(link.duplicated(), 0);
}

#[test]
fn duplicated_full_snapshots_are_harmless() {
    let peers = Peers::new(&SyncConfig::default());
    let mut link = LossyLink::new(
        LinkConditions {
            duplicate_probability: 1.0,
            ..LinkConditions::mobile()
        },
        3,
    );
    let mut delivered_total = 0;

    for tick in 0..40 {
        // Every snapshot starts a fresh chain, so duplicates re-seed the same baseline
        peers.sender.clear_client(Some("c1"));
        let state = data::game_state(tick);
        let envelope = peers.sender.encode_for_network(&state, Some("c1")).unwrap();
        assert!(!envelope.metadata.delta);

        for delivered in link.transmit(envelope) {
            assert_eq!(
                peers.receiver.decode_from_network(&delivered, Some("c1")).unwrap(),
                state
            );
            delivered_total += 1;
        }
    }

    assert_eq!(link.sent(), 40);
    assert_eq!(link.duplicated() + link.dropped(), 40);
    assert_eq!(delivered_total as u64, 2 * link.duplicated());
}
