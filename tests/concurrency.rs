#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use peer_protocol::config::ConnectionConfig;
use peer_protocol::core::envelope::Envelope;
use peer_protocol::protocol::flags::MessageType;
use peer_protocol::transport::{Connection, ConnectionSettings, Direction};
use peer_protocol::utils::compression::supported_tags;
use peer_protocol::utils::metrics::Metrics;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    use tokio::task::JoinSet;

    let iterations = 2_000usize;
    let payload_sizes = [0usize, 64, 512, 4096, 65536];
    let offer = Arc::new(supported_tags());

    let mut tasks = JoinSet::new();
    for &size in &payload_sizes {
        let offer = offer.clone();
        tasks.spawn(async move {
            for i in 0..iterations {
                let payload = vec![Bytes::from(vec![((i + size) & 0xFF) as u8; size])];
                let envelope = Envelope::new(MessageType::Broadcast, "nodeA", payload, i as u64)
                    .with_compression_offer(offer.to_vec());
                let frame = envelope.encode().unwrap();
                let decoded = Envelope::decode(&frame, false, &offer).unwrap();
                assert_eq!(decoded.id(), envelope.id());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_senders_share_one_connection() {
    let mut config = ConnectionConfig::default();
    config.outbound_queue_capacity = 8 * 500;
    let settings = ConnectionSettings::from_config(&config, "nodeA");
    let (conn, mut rx) = Connection::new(Direction::Outbound, None, settings, Arc::new(Metrics::new()));

    let mut handles = Vec::new();
    for task in 0..8u8 {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..500u32 {
                let mut packet = vec![task];
                packet.extend_from_slice(&i.to_be_bytes());
                conn.send(MessageType::Whisper, vec![Bytes::from(packet)]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // frames from any one sender keep their relative order
    let mut next = [0u32; 8];
    let offer = supported_tags();
    for _ in 0..8 * 500 {
        let frame = rx.recv().await.unwrap();
        let envelope = Envelope::decode(&frame, false, &offer).unwrap();
        let packet = &envelope.payload()[0];
        let task = packet[0] as usize;
        let seq = u32::from_be_bytes([packet[1], packet[2], packet[3], packet[4]]);
        assert_eq!(seq, next[task]);
        next[task] += 1;
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_on_separate_connections() {
    let frames: Vec<Bytes> = (0..200u64)
        .map(|ts| {
            Envelope::new(
                MessageType::Broadcast,
                "nodeA",
                vec![Bytes::from(ts.to_be_bytes().to_vec())],
                ts,
            )
            .encode()
            .unwrap()
        })
        .collect();
    let stream: Arc<Vec<u8>> = Arc::new(frames.iter().flat_map(|f| f.to_vec()).collect());

    let mut handles = Vec::new();
    for chunk in [1usize, 7, 64, 1500] {
        let stream = stream.clone();
        handles.push(tokio::spawn(async move {
            let settings = ConnectionSettings::from_config(&ConnectionConfig::default(), "nodeB");
            let (conn, _rx) =
                Connection::new(Direction::Inbound, None, settings, Arc::new(Metrics::new()));
            let mut seen = Vec::new();
            for piece in stream.chunks(chunk) {
                for envelope in conn.on_bytes_received(piece).into_result().unwrap() {
                    seen.push(envelope.timestamp());
                }
            }
            seen
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), (0..200).collect::<Vec<u64>>());
    }
}
