#![no_main]
use libfuzzer_sys::fuzz_target;

use namechain::core::types::{normalize_name, RecordType};
use std::str::FromStr;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = normalize_name(text);
        let _ = RecordType::from_str(text);
    }
});
