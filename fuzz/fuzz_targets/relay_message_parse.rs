#![no_main]

use frens_core::parse_relay_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(message) = parse_relay_message(&raw) {
        let reparsed = parse_relay_message(&message.to_json()).expect("own frame reparses");
        assert_eq!(reparsed, message);
    }
});
