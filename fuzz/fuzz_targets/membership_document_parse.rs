#![no_main]

use frens_access::parse_membership_document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(document) = parse_membership_document(&raw) {
        let allowlist = document.allowlist();
        assert_eq!(allowlist.len(), document.frens.len());
        assert!(allowlist.iter().all(|identity| !identity.as_str().is_empty()));
    }
});
