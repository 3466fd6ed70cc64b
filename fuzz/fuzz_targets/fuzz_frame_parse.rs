//! Fuzz target: `frame::parse`
//!
//! Any byte sequence either parses into a header plus the remaining bytes
//! or is rejected; a parsed frame re-encodes to the same bytes.
//!
//! cargo fuzz run fuzz_frame_parse

#![no_main]

use devbus::bus::frame::{self, HEADER_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some((header, payload)) = frame::parse(data) {
        assert_eq!(payload.len(), data.len() - HEADER_LEN);
        assert_eq!(frame::encode(header, payload), data);
    }
});
