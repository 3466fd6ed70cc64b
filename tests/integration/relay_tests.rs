//! Integration tests for relaying sessions between two buses over an
//! in-process link hub.
//!
//! Device X has the client-facing channel and the relay endpoint; device Y
//! is only reachable through X.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use devbus::adapters::link::{self, Inbound, LinkHub};
use devbus::adapters::time::ManualClock;
use devbus::bus::frame;
use devbus::bus::{
    Bus, BusBuilder, Channel, ChannelContext, ChannelId, EP_BEGIN, EP_CONTROL, EP_END, Outcome,
    SessionId,
};
use devbus::config::BusConfig;
use devbus::endpoints::relay::{KIND_RESPONSE, Relay, encode_packet};
use devbus::endpoints::{AccessGate, EP_RELAY, Open};
use devbus::ports::{PeerId, RelayLink};

use crate::mock_channel::{ReverseEcho, Rig, Tracker, begin_frame, data, split};

const X: PeerId = 0x0A01;
const Y: PeerId = 0x0B02;
const LINK_MTU: usize = 200;
const ECHO: u8 = 0x10;

struct Far {
    bus: Arc<Bus>,
    relay: Arc<Relay>,
    channel: ChannelId,
    inbox: Receiver<Inbound>,
    tracker: Arc<Tracker>,
}

struct Mesh {
    x: Rig,
    x_relay: Arc<Relay>,
    x_channel: ChannelId,
    x_inbox: Receiver<Inbound>,
    y: Far,
}

/// Unlocks only the listed sessions.
struct Only(Vec<SessionId>);

impl AccessGate for Only {
    fn is_unlocked(&self, session: SessionId) -> bool {
        self.0.contains(&session)
    }
}

impl Mesh {
    fn new() -> Self {
        Self::with_gate(Arc::new(Open))
    }

    fn with_gate(gate: Arc<dyn AccessGate>) -> Self {
        let hub = LinkHub::new();

        let (x_link, x_inbox) = hub.attach(X, LINK_MTU);
        let x_relay = Arc::new(Relay::new(Arc::new(x_link), gate));
        let mut x_channel = 0;
        let x = Rig::new(|b| {
            x_channel = b.register_channel(x_relay.channel()).unwrap();
            b.register_endpoint(Arc::clone(&x_relay)).unwrap();
        });

        let (y_link, y_inbox) = hub.attach(Y, LINK_MTU);
        let y_relay = Arc::new(Relay::new(Arc::new(y_link), Arc::new(Open)));
        let tracker = Tracker::new(0x20);
        let mut builder = BusBuilder::new(&BusConfig::default());
        let y_channel = builder.register_channel(y_relay.channel()).unwrap();
        builder.register_endpoint(ReverseEcho(ECHO)).unwrap();
        builder.register_endpoint(Arc::clone(&tracker)).unwrap();
        let y_bus = builder.build(Arc::new(ManualClock::new(0)));

        Self {
            x,
            x_relay,
            x_channel,
            x_inbox,
            y: Far {
                bus: y_bus,
                relay: y_relay,
                channel: y_channel,
                inbox: y_inbox,
                tracker,
            },
        }
    }

    /// Move packets both ways until the link is quiet.
    fn settle(&self) {
        loop {
            let mut moved = link::drain(&self.y.bus, &self.y.relay, self.y.channel, &self.y.inbox);
            moved += self.y.bus.process_pending();
            moved += link::drain(&self.x.bus, &self.x_relay, self.x_channel, &self.x_inbox);
            moved += self.x.bus.process_pending();
            if moved == 0 {
                break;
            }
        }
    }

    /// Queue `inner` for `peer` from session `sid` on X's channel `channel`.
    fn send_via(&self, channel: ChannelId, sid: SessionId, peer: PeerId, inner: &[u8]) {
        let mut payload = peer.to_le_bytes().to_vec();
        payload.extend_from_slice(inner);
        assert!(self.x.bus.dispatch(channel, &data(sid, EP_RELAY, &payload), ChannelContext::None));
    }

    /// Relay `inner` to `peer` from client session `sid`; returns every
    /// frame the client received.
    fn relay(&self, sid: SessionId, peer: PeerId, inner: &[u8]) -> Vec<Vec<u8>> {
        self.send_via(self.x.a_id, sid, peer, inner);
        self.x.bus.process_pending();
        self.settle();
        self.x.a.take()
    }
}

/// Unwrap a relayed reply: `[peer][frame]` on the relay endpoint.
fn relayed(frame_bytes: &[u8]) -> (PeerId, SessionId, u8, Vec<u8>) {
    let (_, ep, payload) = split(frame_bytes);
    assert_eq!(ep, EP_RELAY);
    let peer = u16::from_le_bytes([payload[0], payload[1]]);
    let (sid, ep, inner) = split(&payload[2..]);
    (peer, sid, ep, inner)
}

fn ack(sid: SessionId) -> Vec<u8> {
    data(sid, EP_CONTROL, &[])
}

#[test]
fn session_on_far_device_through_relay() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();

    // Begin on Y through X: ack from X, then Y's echo relayed back.
    let frames = mesh.relay(sid, Y, &begin_frame());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], ack(sid));
    let (peer, far_sid, ep, _) = relayed(&frames[1]);
    assert_eq!((peer, ep), (Y, EP_BEGIN));
    assert!(mesh.y.bus.is_active(far_sid));

    // Data on the far session.
    let frames = mesh.relay(sid, Y, &data(far_sid, ECHO, b"abc"));
    assert_eq!(frames[0], ack(sid));
    assert_eq!(relayed(&frames[1]), (Y, far_sid, ECHO, b"cba".to_vec()));

    // End on the far session.
    let frames = mesh.relay(sid, Y, &data(far_sid, EP_END, &[]));
    assert_eq!(relayed(&frames[1]), (Y, far_sid, EP_END, vec![]));
    assert!(!mesh.y.bus.is_active(far_sid));
    assert_eq!(mesh.y.tracker.cleanups(), vec![far_sid]);
}

#[test]
fn far_session_mtu_follows_origin_budget() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();
    let frames = mesh.relay(sid, Y, &begin_frame());
    let (_, far_sid, _, _) = relayed(&frames[1]);

    // X session: 64-byte MTU, 60-byte payload, 2 bytes of peer address.
    // Y side: min(58, link MTU) minus the 5-byte relay header.
    assert_eq!(mesh.y.bus.session_mtu(far_sid), Some(53));
}

#[test]
fn far_errors_come_back_relayed() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();
    let frames = mesh.relay(sid, Y, &begin_frame());
    let (_, far_sid, _, _) = relayed(&frames[1]);

    let frames = mesh.relay(sid, Y, &data(far_sid, 0x55, &[]));
    assert_eq!(
        relayed(&frames[1]),
        (Y, far_sid, EP_CONTROL, vec![Outcome::Unknown.code()])
    );
}

#[test]
fn unreachable_peer_is_an_error() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();
    let frames = mesh.relay(sid, 0x0FFF, &begin_frame());
    assert_eq!(frames, vec![data(sid, EP_CONTROL, &[Outcome::Error.code()])]);
}

#[test]
fn malformed_relay_payloads_are_rejected() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();

    assert_eq!(mesh.x.call(sid, EP_RELAY, &[0x02]), vec![data(sid, EP_CONTROL, &[0x02])]);
    let frames = mesh.relay(sid, Y, &[0x09, 0, 0, 0]);
    assert_eq!(frames, vec![data(sid, EP_CONTROL, &[Outcome::Invalid.code()])]);
}

#[test]
fn sessions_relaying_to_one_peer_get_only_their_own_responses() {
    let mesh = Mesh::new();
    let s1 = mesh.x.begin();
    let s2 = mesh.x.begin_on(mesh.x.b_id, &mesh.x.b, ChannelContext::None).unwrap();

    // Both begins are on the link before either response comes back.
    mesh.send_via(mesh.x.a_id, s1, Y, &begin_frame());
    mesh.send_via(mesh.x.b_id, s2, Y, &begin_frame());
    mesh.x.bus.process_pending();
    mesh.settle();

    let on_a = mesh.x.a.take();
    let on_b = mesh.x.b.take();
    assert_eq!(on_a.len(), 2);
    assert_eq!(on_b.len(), 2);
    assert_eq!((on_a[0].clone(), on_b[0].clone()), (ack(s1), ack(s2)));
    assert_eq!(split(&on_a[1]).0, s1);
    assert_eq!(split(&on_b[1]).0, s2);
    let (_, far1, ep1, _) = relayed(&on_a[1]);
    let (_, far2, ep2, _) = relayed(&on_b[1]);
    assert_eq!((ep1, ep2), (EP_BEGIN, EP_BEGIN));
    assert_ne!(far1, far2);

    // Interleaved data on the two far sessions.
    mesh.send_via(mesh.x.a_id, s1, Y, &data(far1, ECHO, b"one"));
    mesh.send_via(mesh.x.b_id, s2, Y, &data(far2, ECHO, b"two"));
    mesh.x.bus.process_pending();
    mesh.settle();

    let on_a = mesh.x.a.take();
    let on_b = mesh.x.b.take();
    assert_eq!(relayed(&on_a[1]), (Y, far1, ECHO, b"eno".to_vec()));
    assert_eq!(relayed(&on_b[1]), (Y, far2, ECHO, b"owt".to_vec()));
    assert_eq!((on_a.len(), on_b.len()), (2, 2));
}

#[test]
fn responses_after_origin_session_ends_are_dropped() {
    let mesh = Mesh::new();
    let sid = mesh.x.begin();
    mesh.relay(sid, Y, &begin_frame());
    assert!(mesh.x_relay.has_route(Y, sid));

    mesh.x.bus.dispatch(mesh.x.a_id, &data(sid, EP_END, &[]), ChannelContext::None);
    mesh.x.a.take();
    assert!(!mesh.x_relay.has_route(Y, sid));

    let stray = encode_packet(KIND_RESPONSE, 60, sid, &data(1, ECHO, b"late"));
    assert!(!mesh.x_relay.ingress(&mesh.x.bus, mesh.x_channel, Y, &stray));
    assert_eq!(mesh.x.a.sent_count(), 0);
}

#[test]
fn responses_naming_a_session_that_never_relayed_are_dropped() {
    let mesh = Mesh::new();
    let relaying = mesh.x.begin();
    let bystander = mesh.x.begin_on(mesh.x.b_id, &mesh.x.b, ChannelContext::None).unwrap();
    mesh.relay(relaying, Y, &begin_frame());

    let forged = encode_packet(KIND_RESPONSE, 60, bystander, &data(1, ECHO, b"peek"));
    assert!(!mesh.x_relay.ingress(&mesh.x.bus, mesh.x_channel, Y, &forged));
    assert_eq!(mesh.x.b.sent_count(), 0);
}

#[test]
fn locked_sessions_cannot_relay() {
    let mesh = Mesh::with_gate(Arc::new(Only(vec![1])));
    let unlocked = mesh.x.begin();
    let locked = mesh.x.begin();
    assert_eq!(unlocked, 1);

    let frames = mesh.relay(locked, Y, &begin_frame());
    assert_eq!(frames, vec![data(locked, EP_CONTROL, &[Outcome::Locked.code()])]);
    assert_eq!(mesh.y.bus.active_sessions(), 0);

    // Short payloads are still reported before the gate.
    assert_eq!(mesh.x.call(locked, EP_RELAY, &[0x02]), vec![data(locked, EP_CONTROL, &[0x02])]);

    let frames = mesh.relay(unlocked, Y, &begin_frame());
    assert_eq!(frames[0], ack(unlocked));
    assert_eq!(mesh.y.bus.active_sessions(), 1);
}

#[test]
fn relay_channel_refuses_non_relay_context() {
    struct Dead;
    impl RelayLink for Dead {
        fn mtu(&self) -> usize {
            64
        }
        fn send(&self, _: PeerId, _: &[u8]) -> bool {
            false
        }
    }
    let relay = Relay::new(Arc::new(Dead), Arc::new(Open));
    let channel = relay.channel();
    assert!(!channel.send(&frame::encode(frame::Header::new(1, ECHO), &[]), &ChannelContext::None));
    let context = ChannelContext::Relay {
        peer: 1,
        budget: 1000,
        origin: 1,
    };
    assert_eq!(channel.mtu(&context), 59);
}
