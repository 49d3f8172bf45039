//! Property-based tests using proptest
//!
//! These tests validate protocol invariants across a wide range of randomly
//! generated inputs, ensuring robust behavior under all conditions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use peer_protocol::config::ConnectionConfig;
use peer_protocol::core::base58;
use peer_protocol::core::envelope::Envelope;
use peer_protocol::core::identity::ProtocolIdentity;
use peer_protocol::error::ProtocolError;
use peer_protocol::protocol::flags::MessageType;
use peer_protocol::transport::{Connection, ConnectionSettings, Direction};
use peer_protocol::utils::compression::{compress, decompress, supported_tags, SUPPORTED};
use peer_protocol::utils::metrics::Metrics;
use proptest::prelude::*;
use std::sync::Arc;

fn msg_type_strategy() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::Broadcast),
        Just(MessageType::Whisper),
        Just(MessageType::Ping),
        Just(MessageType::Pong),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Vec<Bytes>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 0..6)
        .prop_map(|packets| packets.into_iter().map(Bytes::from).collect())
}

fn offer_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::sample::subsequence(supported_tags(), 0..=4)
}

// Property: Any envelope survives encode then decode with the same offer
proptest! {
    #[test]
    fn prop_envelope_roundtrip(
        msg_type in msg_type_strategy(),
        sender in prop::collection::vec(any::<u8>(), 0..64),
        payload in payload_strategy(),
        timestamp in any::<u64>(),
        offer in offer_strategy(),
    ) {
        let envelope = Envelope::new(msg_type, sender, payload, timestamp)
            .with_compression_offer(offer.clone());

        let frame = envelope.encode().expect("Encoding should not fail");
        let decoded = Envelope::decode(&frame, false, &offer).expect("Decoding should not fail");

        prop_assert_eq!(decoded, envelope);
    }
}

// Property: The frame header always equals the body length
proptest! {
    #[test]
    fn prop_frame_length_field_correct(payload in payload_strategy(), offer in offer_strategy()) {
        let frame = Envelope::new(MessageType::Broadcast, "nodeA", payload, 1)
            .with_compression_offer(offer)
            .encode()
            .unwrap();

        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(declared, frame.len() - 4);
    }
}

// Property: Encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic(payload in payload_strategy(), timestamp in any::<u64>()) {
        let envelope = Envelope::new(MessageType::Whisper, "nodeA", payload, timestamp);
        prop_assert_eq!(envelope.encode().unwrap(), envelope.encode().unwrap());
    }
}

// Property: Changing any payload byte breaks the integrity check
proptest! {
    #[test]
    fn prop_payload_mutation_detected(
        payload in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..256), 1..4),
        flip in 1u8..=255,
    ) {
        let payload: Vec<Bytes> = payload.into_iter().map(Bytes::from).collect();
        let mut frame = Envelope::new(MessageType::Broadcast, "nodeA", payload, 99)
            .encode()
            .unwrap()
            .to_vec();

        let last = frame.len() - 1;
        frame[last] ^= flip;

        let is_integrity_error = matches!(
            Envelope::decode(&frame, false, &[]),
            Err(ProtocolError::Integrity { .. })
        );
        prop_assert!(is_integrity_error);
    }
}

// Property: Arbitrary chunking of a byte stream yields the same envelopes in order
proptest! {
    #[test]
    fn prop_chunked_feeding(
        payloads in prop::collection::vec(payload_strategy(), 1..6),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let envelopes: Vec<Envelope> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Envelope::new(MessageType::Broadcast, "nodeA", payload, i as u64))
            .collect();

        let mut stream = Vec::new();
        for envelope in &envelopes {
            stream.extend_from_slice(&envelope.encode().unwrap());
        }

        let mut points: Vec<usize> = cuts.iter().map(|ix| ix.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let settings = ConnectionSettings::from_config(&ConnectionConfig::default(), "nodeB");
        let (conn, _rx) = Connection::new(Direction::Inbound, None, settings, Arc::new(Metrics::new()));

        let mut received = Vec::new();
        for window in points.windows(2) {
            let piece = &stream[window[0]..window[1]];
            received.extend(conn.on_bytes_received(piece).into_result().unwrap());
        }

        let received: Vec<(String, Vec<Bytes>)> =
            received.iter().map(|e| (e.id(), e.payload().to_vec())).collect();
        let expected: Vec<(String, Vec<Bytes>)> =
            envelopes.iter().map(|e| (e.id(), e.payload().to_vec())).collect();
        prop_assert_eq!(received, expected);
    }
}

// Property: base58 round-trips integers of any width
proptest! {
    #[test]
    fn prop_base58_u64_roundtrip(value in any::<u64>()) {
        let text = base58::encode_u64(value);
        prop_assert_eq!(base58::decode_u64(&text).unwrap(), value);
    }

    #[test]
    fn prop_base58_bytes_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let text = base58::encode(&bytes);
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        prop_assert_eq!(base58::decode(&text).unwrap(), bytes[first_nonzero..].to_vec());
    }
}

// Property: Distinct subnets never share a fingerprint
proptest! {
    #[test]
    fn prop_fingerprint_diverges(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
        prop_assume!(a != b);
        let left = ProtocolIdentity::new(a.as_str(), "Plaintext");
        let right = ProtocolIdentity::new(b.as_str(), "Plaintext");
        prop_assert_ne!(left.fingerprint(), right.fingerprint());
    }
}

// Property: Every codec round-trips arbitrary data
proptest! {
    #[test]
    fn prop_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..20000)) {
        for kind in SUPPORTED {
            let compressed = compress(&data, &kind).expect("Compression should not fail");
            let decompressed = decompress(&compressed, &kind).expect("Decompression should not fail");
            prop_assert_eq!(&decompressed, &data);
        }
    }
}

// Property: Decompressing garbage returns instead of panicking
proptest! {
    #[test]
    fn prop_decompression_invalid_data_never_panics(data in prop::collection::vec(any::<u8>(), 0..1000)) {
        for kind in SUPPORTED {
            let _ = decompress(&data, &kind);
        }
    }
}

// Property: Decoding arbitrary bytes returns instead of panicking
proptest! {
    #[test]
    fn prop_decode_garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..512), sizeless in any::<bool>()) {
        let _ = Envelope::decode(&data, sizeless, &supported_tags());
    }
}
