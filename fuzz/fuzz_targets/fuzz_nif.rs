#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Rejections are fine, panics are bugs.
        if fatura::core::validate_nif(s).is_ok() {
            assert_eq!(s.len(), 9);
        }
    }
});
