//! Fuzz target: `Bus::dispatch`
//!
//! Splits the input into frames (one length byte each) and feeds them to a
//! bus with a discarding channel, running the worker after every frame.
//! The bus must never panic or exceed its session capacity.
//!
//! cargo fuzz run fuzz_dispatch

#![no_main]

use devbus::adapters::time::ManualClock;
use devbus::bus::{BusBuilder, Channel, ChannelContext, MAX_SESSIONS};
use devbus::config::BusConfig;
use libfuzzer_sys::fuzz_target;

struct Discard;

impl Channel for Discard {
    fn name(&self) -> &'static str {
        "discard"
    }
    fn mtu(&self, _: &ChannelContext) -> usize {
        64
    }
    fn send(&self, _: &[u8], _: &ChannelContext) -> bool {
        true
    }
}

fuzz_target!(|data: &[u8]| {
    let mut builder = BusBuilder::new(&BusConfig::default());
    let Ok(channel) = builder.register_channel(Discard) else {
        return;
    };
    let bus = builder.build(ManualClock::new(0));

    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (frame, tail) = tail.split_at(len);
        bus.dispatch(channel, frame, ChannelContext::None);
        bus.process_pending();
        assert!(bus.active_sessions() <= MAX_SESSIONS);
        rest = tail;
    }
});
