//! Recording channel, test endpoints and a bus rig for integration tests.
//!
//! Every frame the bus sends is captured with its context so tests can
//! assert on the full wire history without sockets.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use devbus::adapters::time::ManualClock;
use devbus::bus::frame::{self, Header};
use devbus::bus::{
    Bus, BusBuilder, Channel, ChannelContext, ChannelId, EP_BEGIN, Endpoint, EndpointId, Outcome,
    Request, SessionId,
};
use devbus::config::BusConfig;

// ── RecordingChannel ──────────────────────────────────────────

pub struct RecordingChannel {
    name: &'static str,
    mtu: usize,
    sent: Mutex<Vec<(Vec<u8>, ChannelContext)>>,
    accepting: AtomicBool,
}

impl RecordingChannel {
    pub fn new(name: &'static str, mtu: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            mtu,
            sent: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        })
    }

    /// Frames sent since the last call.
    pub fn take(&self) -> Vec<Vec<u8>> {
        self.take_with_context().into_iter().map(|(f, _)| f).collect()
    }

    pub fn take_with_context(&self) -> Vec<(Vec<u8>, ChannelContext)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Make `send` fail, like a transport whose link dropped.
    pub fn set_accepting(&self, on: bool) {
        self.accepting.store(on, Ordering::Relaxed);
    }
}

impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mtu(&self, _: &ChannelContext) -> usize {
        self.mtu
    }

    fn send(&self, frame: &[u8], context: &ChannelContext) -> bool {
        if !self.accepting.load(Ordering::Relaxed) {
            return false;
        }
        self.sent.lock().unwrap().push((frame.to_vec(), *context));
        true
    }
}

// ── Test endpoints ────────────────────────────────────────────

/// Replies with the payload reversed.
pub struct ReverseEcho(pub EndpointId);

impl Endpoint for ReverseEcho {
    fn id(&self) -> EndpointId {
        self.0
    }
    fn name(&self) -> &'static str {
        "reverse-echo"
    }
    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let reversed: Vec<u8> = request.payload().iter().rev().copied().collect();
        request.reply(&reversed);
        Outcome::Ok
    }
}

/// Returns a fixed outcome without replying.
pub struct Fixed(pub EndpointId, pub Outcome);

impl Endpoint for Fixed {
    fn id(&self) -> EndpointId {
        self.0
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
    fn handle(&self, _: &mut Request<'_>) -> Outcome {
        self.1
    }
}

/// Replies `reply_len` bytes, then returns `outcome`.
pub struct ReplyThen {
    pub id: EndpointId,
    pub reply_len: usize,
    pub outcome: Outcome,
}

impl Endpoint for ReplyThen {
    fn id(&self) -> EndpointId {
        self.id
    }
    fn name(&self) -> &'static str {
        "reply-then"
    }
    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        request.reply(&vec![0xAB; self.reply_len]);
        self.outcome
    }
}

/// Records handled messages and cleanup calls.
#[derive(Default)]
pub struct Tracker {
    pub id: EndpointId,
    pub handled: Mutex<Vec<(SessionId, Vec<u8>)>>,
    pub cleanups: Mutex<Vec<SessionId>>,
}

impl Tracker {
    pub fn new(id: EndpointId) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Self::default()
        })
    }

    pub fn cleanups(&self) -> Vec<SessionId> {
        self.cleanups.lock().unwrap().clone()
    }

    pub fn handled(&self) -> Vec<(SessionId, Vec<u8>)> {
        self.handled.lock().unwrap().clone()
    }
}

impl Endpoint for Tracker {
    fn id(&self) -> EndpointId {
        self.id
    }
    fn name(&self) -> &'static str {
        "tracker"
    }
    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        self.handled
            .lock()
            .unwrap()
            .push((request.session(), request.payload().to_vec()));
        Outcome::Ok
    }
    fn cleanup(&self, session: SessionId) {
        self.cleanups.lock().unwrap().push(session);
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub const MTU: usize = 64;

/// A bus with two recording channels and a manual clock.
pub struct Rig {
    pub bus: Arc<Bus>,
    pub clock: Arc<ManualClock>,
    pub a: Arc<RecordingChannel>,
    pub a_id: ChannelId,
    pub b: Arc<RecordingChannel>,
    pub b_id: ChannelId,
}

impl Rig {
    pub fn new(endpoints: impl FnOnce(&mut BusBuilder)) -> Self {
        Self::with_config(&BusConfig::default(), endpoints)
    }

    pub fn with_config(config: &BusConfig, endpoints: impl FnOnce(&mut BusBuilder)) -> Self {
        let a = RecordingChannel::new("chan-a", MTU);
        let b = RecordingChannel::new("chan-b", MTU);
        let clock = Arc::new(ManualClock::new(0));

        let mut builder = BusBuilder::new(config);
        let a_id = builder.register_channel(Arc::clone(&a)).unwrap();
        let b_id = builder.register_channel(Arc::clone(&b)).unwrap();
        endpoints(&mut builder);
        let bus = builder.build(Arc::clone(&clock));

        Self {
            bus,
            clock,
            a,
            a_id,
            b,
            b_id,
        }
    }

    /// Open a session on channel A and return its id.
    pub fn begin(&self) -> SessionId {
        self.begin_on(self.a_id, &self.a, ChannelContext::None)
            .expect("begin must succeed")
    }

    pub fn begin_on(
        &self,
        channel: ChannelId,
        chan: &RecordingChannel,
        context: ChannelContext,
    ) -> Option<SessionId> {
        if !self.bus.dispatch(channel, &begin_frame(), context) {
            return None;
        }
        let echo = chan.take().pop()?;
        let (header, _) = frame::parse(&echo)?;
        Some(header.session)
    }

    /// Send a data frame on channel A and run the worker.
    pub fn call(&self, sid: SessionId, ep: EndpointId, payload: &[u8]) -> Vec<Vec<u8>> {
        assert!(self.bus.dispatch(self.a_id, &data(sid, ep, payload), ChannelContext::None));
        self.bus.process_pending();
        self.a.take()
    }
}

pub fn begin_frame() -> Vec<u8> {
    frame::encode(Header::new(0, EP_BEGIN), &[])
}

pub fn data(sid: SessionId, ep: EndpointId, payload: &[u8]) -> Vec<u8> {
    frame::encode(Header::new(sid, ep), payload)
}

/// Split a captured frame into (session, endpoint, payload).
pub fn split(frame_bytes: &[u8]) -> (SessionId, EndpointId, Vec<u8>) {
    let (header, payload) = frame::parse(frame_bytes).expect("well-formed frame");
    (header.session, header.endpoint, payload.to_vec())
}
