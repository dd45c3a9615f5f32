#![no_main]
use fieldpack::{decode_bytes, EncodedField};
use libfuzzer_sys::fuzz_target;

// Arbitrary input must come back as an error, never a panic.
fuzz_target!(|data: &[u8]| {
    let _ = decode_bytes(data, None);
    let _ = EncodedField::<f32>::from_bytes(data);
});
