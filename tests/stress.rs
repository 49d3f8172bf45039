#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::{Bytes, BytesMut};
use peer_protocol::core::codec::FrameCodec;
use peer_protocol::core::envelope::Envelope;
use peer_protocol::protocol::flags::MessageType;
use peer_protocol::utils::compression::supported_tags;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_envelope_encode_decode_large_series() {
    // Heavy burst of frames through the codec; no panics, every id intact
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    let offer = supported_tags();

    for size in [0usize, 1, 64, 512, 4096, 65536, 1_048_576] {
        let rounds = if size >= 65536 { 50 } else { 2_000 };
        for round in 0..rounds {
            let envelope = Envelope::new(
                MessageType::Broadcast,
                "nodeA",
                vec![Bytes::from(vec![(round & 0xFF) as u8; size])],
                round as u64,
            )
            .with_compression_offer(offer.clone());

            codec.encode(envelope.encode().unwrap(), &mut buf).unwrap();
            let frame = codec.decode(&mut buf).unwrap().unwrap();
            let decoded = Envelope::decode(&frame, false, &offer).unwrap();
            assert_eq!(decoded.id(), envelope.id());
            assert!(buf.is_empty());
        }
    }
}
