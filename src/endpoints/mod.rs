//! Service endpoints shipped with the bus.
//!
//! | Ref    | Endpoint  | Gated | Backed by          |
//! |--------|-----------|-------|--------------------|
//! | `0x01` | `auth`    | no    | pre-shared key     |
//! | `0x03` | `debug`   | yes   | `CoreDump` port    |
//! | `0x04` | `metrics` | no    | bus counters       |
//! | `0x05` | `update`  | yes   | `FirmwareSink` port|
//! | `0x06` | `relay`   | no    | `RelayLink` port   |
//!
//! Every endpoint takes the first payload byte as its command.
//!
//! ## Locking
//!
//! Endpoint state lives behind the endpoint's own mutex. `cleanup` is
//! called with the bus session lock held and takes that mutex, so a
//! handler must release it before replying or otherwise calling into the
//! bus.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::bus::{Bus, EndpointId, MAX_SESSIONS, SessionId, SessionIds};

pub mod auth;
pub mod debug;
pub mod metrics;
pub mod relay;
pub mod update;

pub const EP_AUTH: EndpointId = 0x01;
pub const EP_DEBUG: EndpointId = 0x03;
pub const EP_METRICS: EndpointId = 0x04;
pub const EP_UPDATE: EndpointId = 0x05;
pub const EP_RELAY: EndpointId = 0x06;

/// Session-scoped authorisation check consulted by gated endpoints.
pub trait AccessGate: Send + Sync {
    fn is_unlocked(&self, session: SessionId) -> bool;
}

/// Gate that lets every session through (bench setups without a key).
pub struct Open;

impl AccessGate for Open {
    fn is_unlocked(&self, _: SessionId) -> bool {
        true
    }
}

// ── Per-session state ────────────────────────────────────────

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Small per-session map sized to the session table.
pub(crate) struct SessionMap<T> {
    entries: Mutex<heapless::Vec<(SessionId, T), MAX_SESSIONS>>,
}

impl<T> SessionMap<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(heapless::Vec::new()),
        }
    }

    /// Run `f` on the entry for `session`, if there is one.
    pub fn with<R>(&self, session: SessionId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut entries = lock(&self.entries);
        entries
            .iter_mut()
            .find(|(s, _)| *s == session)
            .map(|(_, v)| f(v))
    }

    /// Run `f` on the entry for `session`, creating it with `init` first.
    ///
    /// When the map is full, entries of sessions the bus no longer knows
    /// are dropped to make room. Returns `None` only if that frees nothing.
    pub fn with_or_insert<R>(
        &self,
        bus: &Bus,
        session: SessionId,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut entries = lock(&self.entries);
        if entries.is_full() && !entries.iter().any(|(s, _)| *s == session) {
            let held: SessionIds = entries.iter().map(|(s, _)| *s).collect();
            drop(entries);
            let stale: SessionIds = held.into_iter().filter(|s| !bus.is_active(*s)).collect();
            entries = lock(&self.entries);
            entries.retain(|(s, _)| !stale.contains(s));
        }

        let index = match entries.iter().position(|(s, _)| *s == session) {
            Some(i) => i,
            None => {
                entries.push((session, init())).ok()?;
                entries.len() - 1
            }
        };
        Some(f(&mut entries[index].1))
    }

    pub fn remove(&self, session: SessionId) {
        lock(&self.entries).retain(|(s, _)| *s != session);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

// ── Payload helpers ──────────────────────────────────────────

/// Little-endian u32 at `at`, if the payload is long enough.
pub(crate) fn read_u32(payload: &[u8], at: usize) -> Option<u32> {
    let bytes = payload.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Little-endian u16 at `at`, if the payload is long enough.
pub(crate) fn read_u16(payload: &[u8], at: usize) -> Option<u16> {
    let bytes = payload.get(at..at + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
