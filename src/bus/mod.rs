//! Session bus: multiplexes endpoint traffic over arbitrary channels.
//!
//! ```text
//!  ┌──────────┐  frames   ┌──────────────────────────────────────────┐
//!  │ Channel  │──────────▶│ Bus::dispatch                            │
//!  │ (UDP,    │           │   begin / end ─▶ SessionTable (≤ 8)      │
//!  │  serial, │◀──────────│   data        ─▶ queue ─▶ worker         │
//!  │  relay)  │  replies  │                          │               │
//!  └──────────┘           │                          ▼               │
//!                         │                  Endpoint::handle        │
//!                         │                  (auth, debug, update,   │
//!                         │                   metrics, relay, ...)   │
//!                         └──────────────────────────────────────────┘
//! ```
//!
//! A client opens a session by sending a begin frame (session 0, endpoint
//! [`EP_BEGIN`]) on any channel. The bus answers with the same frame
//! carrying the assigned session id; every later frame on that channel
//! names the session. Sessions end on an end frame ([`EP_END`]), after
//! [`BusConfig::idle_timeout`](crate::config::BusConfig::idle_timeout) of
//! silence, or when the transport reports the connection gone.

mod channel;
mod dispatch;
mod endpoint;
pub mod frame;
mod registry;
mod session;
mod stats;

/// 16-bit session id. 0 is reserved for the begin handshake.
pub type SessionId = u16;

pub use channel::{Channel, ChannelContext, ChannelId};
pub use dispatch::{Bus, QUEUE_DEPTH};
pub use endpoint::{
    EP_BEGIN, EP_CONTROL, EP_END, Endpoint, EndpointId, Message, Outcome, Request, is_reserved,
};
pub use frame::{HEADER_LEN, Header, PROTOCOL_VERSION};
pub use registry::{BusBuilder, MAX_CHANNELS, MAX_ENDPOINTS};
pub use session::{MAX_SESSIONS, Session, SessionIds, SessionTable};
pub use stats::BusStats;
