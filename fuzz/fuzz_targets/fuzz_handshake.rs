#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use peer_protocol::protocol::{handshake, renegotiate};

fuzz_target!(|data: &[u8]| {
    // Fuzz tag-list parsing on its own
    let _ = renegotiate::decode_tag_list(data);

    // Split the input into handshake fields on 0xFF separators
    let fields: Vec<Bytes> = data
        .split(|&b| b == 0xFF)
        .map(Bytes::copy_from_slice)
        .collect();
    let mut payload = vec![Bytes::from_static(&[0x05])];
    payload.extend(fields);

    if let Ok(info) = handshake::parse_payload(&payload) {
        assert!(!info.node_id.is_empty());
    }
});
