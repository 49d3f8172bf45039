#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_protocol::utils::compression::{compress, decompress, decompress_tagged, SUPPORTED};

fuzz_target!(|data: &[u8]| {
    for kind in SUPPORTED {
        // Round trip must hold for every codec
        if let Ok(compressed) = compress(data, &kind) {
            let restored = decompress(&compressed, &kind);
            assert_eq!(restored.ok().as_deref(), Some(data));
        }

        // Raw decompression of malformed data must respect size limits
        let _ = decompress(data, &kind);
    }

    // Arbitrary tags, including reserved and unknown ones
    if let Some((&tag, rest)) = data.split_first() {
        let _ = decompress_tagged(rest, tag);
    }
});
