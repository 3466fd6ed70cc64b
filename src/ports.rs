//! Port traits: the boundary between the bus and the device it runs on.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Bus / endpoints
//! ```
//!
//! Platform adapters (clock, flash partitions, coredump storage, peer radio
//! links) implement these traits. The bus and the endpoints consume them as
//! trait objects, so the protocol core never touches hardware directly.

use core::fmt;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock used for session activity stamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Coredump port (debug endpoint)
// ───────────────────────────────────────────────────────────────

/// Read access to the coredump left behind by the last crash.
pub trait CoreDump: Send + Sync {
    /// Size of the stored dump in bytes; 0 when no dump is present.
    fn size(&self) -> usize;

    /// Copy bytes starting at `offset` into `buf`. Returns the number of
    /// bytes copied, 0 at or past the end.
    fn read(&self, offset: usize, buf: &mut [u8]) -> usize;

    /// Discard the stored dump.
    fn erase(&self);
}

// ───────────────────────────────────────────────────────────────
// Firmware sink port (update endpoint)
// ───────────────────────────────────────────────────────────────

/// Destination of a firmware image: the inactive OTA partition on the
/// device, a buffer on the host.
pub trait FirmwareSink: Send {
    /// Prepare to receive `size` bytes.
    fn begin(&mut self, size: u32) -> Result<(), SinkError>;

    /// Append the next block of the image.
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Mark the received image bootable.
    fn commit(&mut self) -> Result<(), SinkError>;

    /// Throw away whatever was received.
    fn abort(&mut self);
}

/// Errors from [`FirmwareSink`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// No partition can hold an image of the requested size.
    NoSpace,
    /// The flash write failed.
    WriteFailed,
    /// The boot partition could not be switched.
    CommitFailed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no space for image"),
            Self::WriteFailed => write!(f, "flash write failed"),
            Self::CommitFailed => write!(f, "commit failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Relay link port
// ───────────────────────────────────────────────────────────────

/// Address of a peer device on the relay link.
pub type PeerId = u16;

/// Point-to-point link to neighbouring devices (e.g. a radio mesh hop).
pub trait RelayLink: Send + Sync {
    /// Largest packet the link carries in one transmission.
    fn mtu(&self) -> usize;

    /// Transmit a packet to `peer`. Returns `false` when the peer is
    /// unreachable or the link is down.
    fn send(&self, peer: PeerId, packet: &[u8]) -> bool;
}
