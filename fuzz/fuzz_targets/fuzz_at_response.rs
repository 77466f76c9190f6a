#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Arbitrary SOAP bodies must parse or fail, never panic.
        if let Ok(resp) = fatura::at::AtResponse::parse(s) {
            let _ = resp.into_result();
        }
    }
});
