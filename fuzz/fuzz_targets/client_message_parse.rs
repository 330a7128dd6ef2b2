#![no_main]

use frens_core::{classify_client_message_error, parse_client_message, ClientMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match parse_client_message(&raw) {
        Ok(message) => {
            if let ClientMessage::Req {
                subscription_id, ..
            }
            | ClientMessage::Close { subscription_id } = &message
            {
                assert!(!subscription_id.is_empty());
            }
            let reparsed = parse_client_message(&message.to_json()).expect("own frame reparses");
            assert_eq!(reparsed.verb(), message.verb());
        }
        Err(error) => {
            let code = classify_client_message_error(&format!("{error:#}"));
            assert!(!code.trim().is_empty());
        }
    }
});
