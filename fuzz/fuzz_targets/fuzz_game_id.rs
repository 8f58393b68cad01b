#![no_main]

use cfh_client::game_id::{decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(value) = decode(s) {
            assert_eq!(decode(&encode(value)), Ok(value));
            assert!(s.eq_ignore_ascii_case(&encode(value)));
        }
    }
});
