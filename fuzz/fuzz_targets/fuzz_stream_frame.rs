#![no_main]

use libfuzzer_sys::fuzz_target;
use voidline_client::protocol::{parse_connected, StreamFrame};
use voidline_client::StreamEvent;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Handshake path: must fail cleanly on anything but a valid `connected`.
    let _ = parse_connected(text);

    // Envelope plus catalog validation, as run for every stream frame.
    let _ = StreamEvent::from_text(text, 0);

    // Frames that parse must survive a re-encode.
    if let Ok(frame) = StreamFrame::parse(text) {
        if let Ok(json) = frame.to_json() {
            let _ = StreamFrame::parse(&json);
        }
    }
});
