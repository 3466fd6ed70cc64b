//! Channel abstraction: any transport that moves whole bus frames.
//!
//! Concrete implementations:
//! - UDP datagrams (host simulator, local network tools)
//! - Length-prefixed byte stream (UART / USB CDC)
//! - Relay hop to a neighbouring device
//!
//! The bus is generic over `Channel`, so adding a transport requires zero
//! changes to dispatch or session handling.

use std::net::SocketAddr;
use std::sync::Arc;

use super::SessionId;
use crate::ports::PeerId;

/// Index of a registered channel.
pub type ChannelId = u8;

/// Per-connection context a transport attaches to inbound frames.
///
/// The bus records it when a session begins and hands it back on every
/// reply, so the channel knows which connection to write to. The transport
/// owns the meaning of each variant and is the authority on whether it is
/// still valid: `send` must refuse a handle whose connection is gone, and
/// the transport calls [`Bus::disconnect`](super::Bus::disconnect) when it
/// tears one down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelContext {
    /// Point-to-point transport with a single peer (serial line).
    #[default]
    None,
    /// Transport-local connection handle (socket descriptor, BLE conn id).
    Connection(u32),
    /// Datagram source address.
    Datagram(SocketAddr),
    /// Frame relayed from a neighbouring device.
    Relay {
        /// Link address of the neighbour.
        peer: PeerId,
        /// Largest frame the originating session can take back.
        budget: u16,
        /// Session on the neighbour the frame came from.
        origin: SessionId,
    },
}

/// Frame-oriented transport registered with the bus.
pub trait Channel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Largest frame (header included) deliverable to `context`.
    ///
    /// Fixed-MTU transports ignore the context; relayed transports derive
    /// it from the hop metadata.
    fn mtu(&self, context: &ChannelContext) -> usize;

    /// Transmit one complete frame. Returns `false` if the frame was not
    /// sent; the bus does not retry.
    fn send(&self, frame: &[u8], context: &ChannelContext) -> bool;
}

impl<T: Channel + ?Sized> Channel for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn mtu(&self, context: &ChannelContext) -> usize {
        (**self).mtu(context)
    }

    fn send(&self, frame: &[u8], context: &ChannelContext) -> bool {
        (**self).send(frame, context)
    }
}
