//! Bus wire frame.
//!
//! Wire format (every channel, both directions):
//! ```text
//! ┌─────────┬──────────────┬──────────┬───────────────────────────┐
//! │ Version │ Session (2B) │ Endpoint │ Payload (≤ MTU − 4 bytes) │
//! │ (1B)    │ LE u16       │ (1B)     │                           │
//! └─────────┴──────────────┴──────────┴───────────────────────────┘
//! ```
//!
//! Channels deliver whole frames; any stream framing (length prefix,
//! BLE fragmentation) is the transport's business and is stripped before
//! the bytes reach the dispatcher.

use super::{EndpointId, SessionId};

/// The single supported protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Frame header size: version + session + endpoint.
pub const HEADER_LEN: usize = 4;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub session: SessionId,
    pub endpoint: EndpointId,
}

impl Header {
    pub const fn new(session: SessionId, endpoint: EndpointId) -> Self {
        Self { session, endpoint }
    }

    /// Serialise the header into its 4 wire bytes.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let sid = self.session.to_le_bytes();
        [PROTOCOL_VERSION, sid[0], sid[1], self.endpoint]
    }
}

/// Split a frame into header and payload.
///
/// Returns `None` for frames shorter than the header or carrying a
/// different protocol version. Such frames cannot be attributed to a
/// session, so the caller drops them without a reply.
pub fn parse(frame: &[u8]) -> Option<(Header, &[u8])> {
    if frame.len() < HEADER_LEN || frame[0] != PROTOCOL_VERSION {
        return None;
    }
    let session = u16::from_le_bytes([frame[1], frame[2]]);
    let header = Header::new(session, frame[3]);
    Some((header, &frame[HEADER_LEN..]))
}

/// Build a complete frame from a header and a payload.
pub fn encode(header: Header, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Overwrite the session field of an encoded frame in place.
///
/// Used to echo a begin frame back with the newly assigned id.
pub fn rewrite_session(frame: &mut [u8], session: SessionId) {
    if frame.len() >= HEADER_LEN {
        frame[1..3].copy_from_slice(&session.to_le_bytes());
    }
}

// ── Tests ────────────────────────────────────────────────────
