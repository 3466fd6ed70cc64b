//! In-process relay link.
//!
//! A [`LinkHub`] connects any number of buses running in one process, each
//! attached under its own peer address. Packets are queued to the
//! receiving side and handed to its [`Relay`] by [`pump`] (a thread) or
//! [`drain`] (the caller, in tests).

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use log::{debug, info};

use crate::bus::{Bus, ChannelId};
use crate::endpoints::relay::Relay;
use crate::ports::{PeerId, RelayLink};

/// Packet as received: sender address and bytes.
pub type Inbound = (PeerId, Vec<u8>);

/// Shared switchboard of attached peers.
#[derive(Clone, Default)]
pub struct LinkHub {
    peers: Arc<Mutex<HashMap<PeerId, Sender<Inbound>>>>,
}

impl LinkHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device under `addr`. Returns its link and its inbox.
    pub fn attach(&self, addr: PeerId, mtu: usize) -> (HubLink, Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel();
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, tx);
        let link = HubLink {
            addr,
            mtu,
            hub: self.clone(),
        };
        (link, rx)
    }

    /// Take `addr` off the hub; later sends to it fail.
    pub fn detach(&self, addr: PeerId) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&addr);
    }
}

/// One device's end of the hub.
pub struct HubLink {
    addr: PeerId,
    mtu: usize,
    hub: LinkHub,
}

impl RelayLink for HubLink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&self, peer: PeerId, packet: &[u8]) -> bool {
        if packet.len() > self.mtu {
            return false;
        }
        let peers = self.hub.peers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = peers.get(&peer) else {
            debug!("LINK: {:04X} → {:04X}: no such peer", self.addr, peer);
            return false;
        };
        tx.send((self.addr, packet.to_vec())).is_ok()
    }
}

/// Hand every queued packet to `relay`. Returns the number handled.
pub fn drain(bus: &Bus, relay: &Relay, channel: ChannelId, inbox: &Receiver<Inbound>) -> usize {
    let mut handled = 0;
    while let Ok((from, packet)) = inbox.try_recv() {
        relay.ingress(bus, channel, from, &packet);
        handled += 1;
    }
    handled
}

/// Feed packets into `relay` on a dedicated thread until the hub goes away.
pub fn pump(
    bus: Arc<Bus>,
    relay: Arc<Relay>,
    channel: ChannelId,
    inbox: Receiver<Inbound>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("relay-rx".into())
        .spawn(move || {
            for (from, packet) in inbox {
                relay.ingress(&bus, channel, from, &packet);
            }
            info!("LINK: inbox closed");
        })
}
