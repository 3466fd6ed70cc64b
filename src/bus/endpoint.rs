//! Endpoint contract: service handlers addressed by a one-byte ref.
//!
//! The worker hands every data frame to the endpoint registered under the
//! frame's ref. The handler may reply any number of times through its
//! [`Request`] before returning an [`Outcome`]; the worker then turns a
//! non-`Ok` outcome into an ack or error frame on [`EP_CONTROL`], unless
//! the handler already replied.

use std::sync::Arc;

use super::dispatch::Bus;
use super::frame::HEADER_LEN;
use super::SessionId;

/// One-byte endpoint reference.
pub type EndpointId = u8;

/// Begin control frame (session id 0) and its echo.
pub const EP_BEGIN: EndpointId = 0x00;
/// Ping from the client; ack / error code from the device.
pub const EP_CONTROL: EndpointId = 0xFE;
/// End control frame and its header-only acknowledgement.
pub const EP_END: EndpointId = 0xFF;

/// Whether `id` is one of the refs the bus handles itself.
pub const fn is_reserved(id: EndpointId) -> bool {
    matches!(id, EP_BEGIN | EP_CONTROL | EP_END)
}

// ── Outcome ──────────────────────────────────────────────────

/// Result of handling one message.
///
/// Every variant except `Ok` reaches the client on [`EP_CONTROL`]: `Ack` as
/// a zero-length payload, the rest as a one-byte code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Outcome {
    /// Handled; the endpoint replied itself or no reply is due.
    Ok = 0x00,
    /// Handled; send an explicit acknowledgement.
    Ack = 0x01,
    /// Payload too short for the command.
    Incomplete = 0x02,
    /// Payload parsed but is semantically wrong.
    Invalid = 0x03,
    /// No such endpoint or sub-command.
    Unknown = 0x04,
    /// Endpoint-specific failure.
    Error = 0x05,
    /// The session is not authorised for this endpoint.
    Locked = 0x06,
}

impl Outcome {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::Ack),
            0x02 => Some(Self::Incomplete),
            0x03 => Some(Self::Invalid),
            0x04 => Some(Self::Unknown),
            0x05 => Some(Self::Error),
            0x06 => Some(Self::Locked),
            _ => None,
        }
    }

    /// Payload of the synthesized reply on [`EP_CONTROL`], `None` for `Ok`.
    pub fn control_payload(self) -> Option<&'static [u8]> {
        match self {
            Self::Ok => None,
            Self::Ack => Some(&[]),
            Self::Incomplete => Some(&[Self::Incomplete as u8]),
            Self::Invalid => Some(&[Self::Invalid as u8]),
            Self::Unknown => Some(&[Self::Unknown as u8]),
            Self::Error => Some(&[Self::Error as u8]),
            Self::Locked => Some(&[Self::Locked as u8]),
        }
    }
}

// ── Message ──────────────────────────────────────────────────

/// A routed unit of work: payload addressed to an endpoint in a session.
///
/// Inbound messages are owned by the worker for the duration of one
/// handler call and dropped right after it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub session: SessionId,
    pub endpoint: EndpointId,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(session: SessionId, endpoint: EndpointId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            session,
            endpoint,
            payload: payload.into(),
        }
    }
}

// ── Request ──────────────────────────────────────────────────

/// Handler view of an inbound message plus the reply path.
pub struct Request<'a> {
    bus: &'a Bus,
    message: &'a Message,
    replied: bool,
}

impl<'a> Request<'a> {
    pub(crate) fn new(bus: &'a Bus, message: &'a Message) -> Self {
        Self {
            bus,
            message,
            replied: false,
        }
    }

    pub fn session(&self) -> SessionId {
        self.message.session
    }

    pub fn endpoint(&self) -> EndpointId {
        self.message.endpoint
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Send `payload` back on this message's session and endpoint.
    ///
    /// Returns `false` if the payload does not fit the session's MTU or the
    /// channel refused the frame.
    pub fn reply(&mut self, payload: &[u8]) -> bool {
        let sent = self.bus.send(self.message.session, self.message.endpoint, payload);
        self.replied |= sent;
        sent
    }

    /// Whether at least one [`reply`](Self::reply) went out.
    pub fn has_replied(&self) -> bool {
        self.replied
    }

    /// Effective frame MTU of this session, header included; 0 once the
    /// session is gone.
    pub fn mtu(&self) -> usize {
        self.bus.session_mtu(self.message.session).unwrap_or(0)
    }

    /// Largest payload a single reply can carry.
    pub fn payload_budget(&self) -> usize {
        self.mtu().saturating_sub(HEADER_LEN)
    }

    /// The bus, for replies on other endpoints or sessions.
    pub fn bus(&self) -> &'a Bus {
        self.bus
    }
}

// ── Endpoint trait ───────────────────────────────────────────

/// Service handler registered with the bus.
///
/// Handlers run one at a time on the worker, with no bus lock held, so
/// they may reply freely. `cleanup` runs with the session table locked
/// and must not call back into the bus.
pub trait Endpoint: Send + Sync {
    /// Ref the endpoint is addressed by. Must not be reserved.
    fn id(&self) -> EndpointId;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Handle one message.
    fn handle(&self, request: &mut Request<'_>) -> Outcome;

    /// Forget any state held for `session`. Called for every endpoint when
    /// a session ends or expires.
    fn cleanup(&self, _session: SessionId) {}
}

impl<T: Endpoint + ?Sized> Endpoint for Arc<T> {
    fn id(&self) -> EndpointId {
        (**self).id()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        (**self).handle(request)
    }

    fn cleanup(&self, session: SessionId) {
        (**self).cleanup(session);
    }
}
