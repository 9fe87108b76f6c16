#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Envelope decoding must reject arbitrary bytes without panicking.
    let _ = namechain::net::envelope::Envelope::from_bytes(data);
});
