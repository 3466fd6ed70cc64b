//! Session table: fixed-capacity map from session id to its binding.
//!
//! Each slot is either empty or holds one active session. Ids are 16-bit on
//! the wire and handed out in increasing order from 1. After wraparound the
//! allocator skips 0 and every id that is still live, so two active
//! sessions can never share an id.

use super::channel::{ChannelContext, ChannelId};
use super::SessionId;

/// Maximum number of concurrent sessions across all channels.
pub const MAX_SESSIONS: usize = 8;

/// Ids of a batch of sessions selected for teardown.
pub type SessionIds = heapless::Vec<SessionId, MAX_SESSIONS>;

/// An active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Channel the session began on. Never changes.
    pub channel: ChannelId,
    /// Transport context recorded at begin.
    pub context: ChannelContext,
    /// Clock reading of the last frame in either direction.
    pub last_activity_ms: u64,
}

/// Fixed-size table of sessions.
pub struct SessionTable {
    slots: [Option<Session>; MAX_SESSIONS],
    next_id: SessionId,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_SESSIONS],
            next_id: 1,
        }
    }

    /// Occupy an empty slot with a fresh session.
    ///
    /// Returns `None` when every slot is taken.
    pub fn open(&mut self, channel: ChannelId, context: ChannelContext, now_ms: u64) -> Option<SessionId> {
        let slot = self.slots.iter().position(Option::is_none)?;
        let id = self.alloc_id();
        self.slots[slot] = Some(Session {
            id,
            channel,
            context,
            last_activity_ms: now_ms,
        });
        Some(id)
    }

    /// Look up a live session.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots.iter().flatten().find(|s| s.id == id)
    }

    /// Look up a live session bound to `channel`.
    ///
    /// A frame carrying the id of a session from another channel resolves
    /// to nothing; sessions never migrate.
    pub fn get_on(&mut self, id: SessionId, channel: ChannelId) -> Option<&mut Session> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.id == id && s.channel == channel)
    }

    /// Refresh the activity stamp. Returns the session if it is live.
    pub fn touch(&mut self, id: SessionId, now_ms: u64) -> Option<Session> {
        let session = self.slots.iter_mut().flatten().find(|s| s.id == id)?;
        session.last_activity_ms = now_ms;
        Some(*session)
    }

    /// Clear the slot holding `id`.
    pub fn close(&mut self, id: SessionId) -> Option<Session> {
        self.slots
            .iter_mut()
            .find(|slot| slot.is_some_and(|s| s.id == id))
            .and_then(Option::take)
    }

    /// Sessions idle for longer than `timeout_ms` at `now_ms`.
    pub fn idle(&self, now_ms: u64, timeout_ms: u64) -> SessionIds {
        self.select(|s| now_ms.saturating_sub(s.last_activity_ms) > timeout_ms)
    }

    /// Sessions bound to the given channel and transport context.
    pub fn bound_to(&self, channel: ChannelId, context: &ChannelContext) -> SessionIds {
        self.select(|s| s.channel == channel && s.context == *context)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn select(&self, pred: impl Fn(&Session) -> bool) -> SessionIds {
        let mut ids = SessionIds::new();
        for s in self.slots.iter().flatten().filter(|s| pred(s)) {
            // Capacity equals the slot count, the push cannot fail.
            let _ = ids.push(s.id);
        }
        ids
    }

    fn alloc_id(&mut self) -> SessionId {
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if self.get(id).is_none() {
                return id;
            }
        }
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
