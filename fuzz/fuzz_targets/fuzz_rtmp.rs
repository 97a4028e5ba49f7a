//! Fuzz target for the RTMP probe.
//!
//! Fuzz data becomes the client chunk stream after a valid handshake,
//! delivered in pieces whose sizes come from the first byte.

#![no_main]

use libfuzzer_sys::fuzz_target;
use streamsniff::handlers::RtmpProbe;

fuzz_target!(|data: &[u8]| {
    let Some((&step, body)) = data.split_first() else {
        return;
    };
    let mut stream = vec![3u8];
    stream.resize(1 + 2 * 1536, 0);
    stream.extend_from_slice(body);

    let mut probe = RtmpProbe::new();
    for piece in stream.chunks(step.max(1) as usize) {
        if probe.feed_client(piece).is_err() {
            return;
        }
    }
    let _ = probe.finish();
});
