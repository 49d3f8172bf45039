#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_protocol::core::codec::FrameCodec;
use peer_protocol::core::envelope::Envelope;
use peer_protocol::utils::compression::supported_tags;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Fuzz envelope decoding - test for panics, crashes, infinite loops
    let offer = supported_tags();
    let _ = Envelope::decode(data, false, &offer);
    let _ = Envelope::decode(data, true, &offer);

    // Reassembly must never panic either, whatever the length headers claim
    let mut codec = FrameCodec::new().with_max_frame_size(1 << 20);
    let mut buf = bytes::BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = Envelope::decode(&frame, false, &offer);
    }
});
