#![no_main]

use cfh_client::protocol::{Envelope, ServerMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path: serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<ServerMessage>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        // What the bus does with every inbound frame.
        if let Some(envelope) = Envelope::parse(s) {
            let _ = envelope.decode::<ServerMessage>();
            let _ = envelope.to_frame();
        }
    }
});
