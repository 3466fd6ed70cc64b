//! Multi-hop relay between neighbouring devices.
//!
//! A client talks to a device it cannot reach directly by tunnelling bus
//! frames through one it can:
//!
//! ```text
//!  client ══ session A ══▶ device X ── relay link ──▶ device Y
//!         ◀═ 0x06 reply ══           ◀── response ──   (session B on
//!                                                       Y's relay channel)
//! ```
//!
//! Link packets:
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────────────┐
//! │ Kind (1B)│ Budget (2B)  │ Origin (2B)  │ Bus frame         │
//! │          │ LE u16       │ LE u16       │                   │
//! └──────────┴──────────────┴──────────────┴───────────────────┘
//! ```
//! `Budget` on a request is the largest frame the originating session can
//! take back; the far side sizes its replies to it. `Origin` is the session
//! on the sending device the frame came from; the far side echoes both
//! fields on every response.
//!
//! - On X, the relay endpoint takes `[peer:u16][frame]` from an unlocked
//!   session, sends the frame to the peer as a request and records that the
//!   session talks to that peer.
//! - On Y, a request is dispatched into the local bus on the relay channel,
//!   so the frame opens or continues a session there like on any channel.
//!   Y's replies go back as response packets carrying the same origin.
//! - On X, a response is handed to its origin session as a reply on the
//!   relay endpoint, prefixed with the peer address. Responses for a session
//!   that never relayed to that peer, or has since ended, are dropped.
//!
//! Link ingress is not gated: any device on the link may open sessions on
//! the relay channel, where each endpoint applies its own gate.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::bus::{Bus, Channel, ChannelContext, ChannelId, Endpoint, EndpointId, Outcome, Request, SessionId};
use crate::bus::frame;
use crate::ports::{PeerId, RelayLink};

use super::{AccessGate, EP_RELAY, lock, read_u16};

pub const KIND_REQUEST: u8 = 0x01;
pub const KIND_RESPONSE: u8 = 0x02;

/// Link packet header: kind + budget + origin.
pub const RELAY_HEADER_LEN: usize = 5;

/// Peer address prefix on endpoint payloads.
const PEER_LEN: usize = 2;

/// (peer, session) pairs kept at once.
const MAX_ROUTES: usize = 16;

/// Build a link packet.
pub fn encode_packet(kind: u8, budget: u16, origin: SessionId, frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RELAY_HEADER_LEN + frame.len());
    out.push(kind);
    out.extend_from_slice(&budget.to_le_bytes());
    out.extend_from_slice(&origin.to_le_bytes());
    out.extend_from_slice(frame);
    out
}

/// Split a link packet into kind, budget, origin and frame.
pub fn parse_packet(packet: &[u8]) -> Option<(u8, u16, SessionId, &[u8])> {
    let budget = read_u16(packet, 1)?;
    let origin = read_u16(packet, 3)?;
    Some((packet[0], budget, origin, &packet[RELAY_HEADER_LEN..]))
}

// ── Relay ────────────────────────────────────────────────────

/// Relay endpoint plus the ingress side of the link.
pub struct Relay {
    link: Arc<dyn RelayLink>,
    gate: Arc<dyn AccessGate>,
    routes: Mutex<heapless::Vec<(PeerId, SessionId), MAX_ROUTES>>,
}

impl Relay {
    pub fn new(link: Arc<dyn RelayLink>, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            link,
            gate,
            routes: Mutex::new(heapless::Vec::new()),
        }
    }

    /// The channel replies to relayed sessions leave through.
    pub fn channel(&self) -> RelayChannel {
        RelayChannel {
            link: Arc::clone(&self.link),
        }
    }

    /// Whether `session` has relayed to `peer` and may take its responses.
    pub fn has_route(&self, peer: PeerId, session: SessionId) -> bool {
        lock(&self.routes).contains(&(peer, session))
    }

    fn add_route(&self, peer: PeerId, session: SessionId) {
        let mut routes = lock(&self.routes);
        routes.retain(|r| *r != (peer, session));
        if routes.is_full() {
            routes.remove(0);
        }
        // Room was made above.
        let _ = routes.push((peer, session));
    }

    /// Feed a packet received from `peer` on the link.
    ///
    /// `channel` is the id the [`RelayChannel`] was registered under.
    /// Returns `false` if the packet was dropped.
    pub fn ingress(&self, bus: &Bus, channel: ChannelId, peer: PeerId, packet: &[u8]) -> bool {
        let Some((kind, budget, origin, frame)) = parse_packet(packet) else {
            debug!("RELAY: short packet from {:04X}", peer);
            return false;
        };
        match kind {
            KIND_REQUEST => bus.dispatch(
                channel,
                frame,
                ChannelContext::Relay {
                    peer,
                    budget,
                    origin,
                },
            ),
            KIND_RESPONSE => {
                if !self.has_route(peer, origin) || !bus.is_active(origin) {
                    debug!("RELAY: response from {:04X} for unrouted session {}", peer, origin);
                    return false;
                }
                let mut payload = Vec::with_capacity(PEER_LEN + frame.len());
                payload.extend_from_slice(&peer.to_le_bytes());
                payload.extend_from_slice(frame);
                bus.send(origin, EP_RELAY, &payload)
            }
            _ => {
                debug!("RELAY: unknown packet kind 0x{:02X} from {:04X}", kind, peer);
                false
            }
        }
    }
}

impl Endpoint for Relay {
    fn id(&self) -> EndpointId {
        EP_RELAY
    }

    fn name(&self) -> &'static str {
        "relay"
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let Some(peer) = read_u16(request.payload(), 0) else {
            return Outcome::Incomplete;
        };
        if !self.gate.is_unlocked(request.session()) {
            return Outcome::Locked;
        }
        let inner = &request.payload()[PEER_LEN..];
        if frame::parse(inner).is_none() {
            return Outcome::Invalid;
        }

        let budget = request.payload_budget().saturating_sub(PEER_LEN);
        let budget = u16::try_from(budget).unwrap_or(u16::MAX);
        let packet = encode_packet(KIND_REQUEST, budget, request.session(), inner);
        if packet.len() > self.link.mtu() {
            warn!(
                "RELAY[{}]: {}-byte frame exceeds link MTU {}",
                request.session(),
                inner.len(),
                self.link.mtu()
            );
            return Outcome::Error;
        }

        self.add_route(peer, request.session());
        if self.link.send(peer, &packet) {
            Outcome::Ack
        } else {
            warn!("RELAY[{}]: peer {:04X} unreachable", request.session(), peer);
            Outcome::Error
        }
    }

    fn cleanup(&self, session: SessionId) {
        lock(&self.routes).retain(|(_, s)| *s != session);
    }
}

// ── Channel ──────────────────────────────────────────────────

/// Outbound side of the relay link, registered as a bus channel.
pub struct RelayChannel {
    link: Arc<dyn RelayLink>,
}

impl Channel for RelayChannel {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn mtu(&self, context: &ChannelContext) -> usize {
        match context {
            ChannelContext::Relay { budget, .. } => {
                (*budget as usize).min(self.link.mtu()).saturating_sub(RELAY_HEADER_LEN)
            }
            _ => 0,
        }
    }

    fn send(&self, frame: &[u8], context: &ChannelContext) -> bool {
        let ChannelContext::Relay {
            peer,
            budget,
            origin,
        } = *context
        else {
            return false;
        };
        self.link.send(peer, &encode_packet(KIND_RESPONSE, budget, origin, frame))
    }
}
