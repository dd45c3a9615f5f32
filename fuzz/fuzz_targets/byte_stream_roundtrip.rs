#![no_main]
use fieldpack::{decode_bytes, encode_bytes};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: Vec<u8>| {
    let stream = encode_bytes(&input).unwrap();
    let output = decode_bytes(&stream, Some(input.len())).unwrap();
    assert_eq!(input, output);
});
