#![no_main]
use libfuzzer_sys::fuzz_target;

use reactor_h1::websocket::FrameDecoder;

fuzz_target!(|input: &[u8]| {
    let mut decoder = FrameDecoder::new(64 * 1024);
    for piece in input.chunks(7) {
        if decoder.feed(piece).is_err() {
            break;
        }
        while let Some(message) = decoder.pop_message() {
            let _ = message.payload();
        }
    }
});
