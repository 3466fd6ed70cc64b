//! UDP datagram channel.
//!
//! One datagram carries exactly one bus frame, so no extra framing is
//! needed. Sessions are bound to the datagram source address
//! ([`ChannelContext::Datagram`]); replies go back to that address.
//! UDP has no connection teardown, so sessions on this channel end by an
//! end frame or by idle expiry.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use log::{debug, info, warn};

use crate::bus::{Bus, Channel, ChannelContext, ChannelId};

/// UDP socket registered as a bus channel.
pub struct UdpChannel {
    socket: UdpSocket,
    mtu: usize,
}

impl UdpChannel {
    /// Bind a socket on `addr` carrying frames of at most `mtu` bytes.
    pub fn bind(addr: SocketAddr, mtu: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        info!("UDP: listening on {}", socket.local_addr()?);
        Ok(Self { socket, mtu })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive datagrams into the bus forever.
    ///
    /// Blocks the calling thread; run it on the transport's own thread.
    /// Datagrams longer than the MTU are truncated by the socket and then
    /// dropped here.
    pub fn serve(&self, bus: &Bus, channel: ChannelId) -> io::Result<()> {
        let mut buf = vec![0u8; self.mtu + 1];
        loop {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n > self.mtu {
                debug!("UDP: oversized datagram from {} dropped", from);
                continue;
            }
            bus.dispatch(channel, &buf[..n], ChannelContext::Datagram(from));
        }
    }
}

impl Channel for UdpChannel {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn mtu(&self, _: &ChannelContext) -> usize {
        self.mtu
    }

    fn send(&self, frame: &[u8], context: &ChannelContext) -> bool {
        let ChannelContext::Datagram(to) = context else {
            warn!("UDP: reply without a datagram address");
            return false;
        };
        match self.socket.send_to(frame, to) {
            Ok(n) => n == frame.len(),
            Err(e) => {
                warn!("UDP: send to {} failed: {}", to, e);
                false
            }
        }
    }
}
