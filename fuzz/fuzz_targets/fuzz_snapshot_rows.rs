#![no_main]
use libfuzzer_sys::fuzz_target;

use namechain::core::types::{decode_json_row_limited, Block, Transaction};

fuzz_target!(|data: &[u8]| {
    // Stored rows come from disk; decoding must stay panic-free and bounded.
    let _ = decode_json_row_limited::<Block>(data, 1 << 20);
    let _ = decode_json_row_limited::<Transaction>(data, 1 << 20);
});
