//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary bytes into the length-prefix decoder, first in one
//! call and then byte by byte, and checks both passes agree.
//!
//! cargo fuzz run fuzz_stream_decoder

#![no_main]

use devbus::adapters::serial::FrameDecoder;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME: usize = 256;

fuzz_target!(|data: &[u8]| {
    let mut whole = Vec::new();
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    decoder.feed(data, |f| whole.push(f.to_vec()));

    let mut bytewise = Vec::new();
    decoder.reset();
    for b in data {
        decoder.feed(std::slice::from_ref(b), |f| bytewise.push(f.to_vec()));
    }

    assert_eq!(whole, bytewise);
    assert!(whole.iter().all(|f| !f.is_empty() && f.len() <= MAX_FRAME));
});
