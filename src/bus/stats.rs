//! Runtime counters for the bus.
//!
//! Counters are plain relaxed atomics bumped from whichever context does
//! the work (transport callbacks, worker, reaper). A [`BusStats`] snapshot
//! is collected on demand for logs and the metrics endpoint.

use core::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Default)]
pub(crate) struct Counters {
    pub frames_received: AtomicU32,
    pub frames_dropped: AtomicU32,
    pub sessions_opened: AtomicU32,
    pub sessions_closed: AtomicU32,
    pub sessions_expired: AtomicU32,
    pub messages_handled: AtomicU32,
    pub replies_sent: AtomicU32,
    pub reply_failures: AtomicU32,
}

impl Counters {
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU32, n: usize) {
        counter.fetch_add(n as u32, Ordering::Relaxed);
    }
}

/// Point-in-time view of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub frames_received: u32,
    /// Frames discarded without a reply (bad header, unknown session,
    /// channel mismatch, table full).
    pub frames_dropped: u32,
    pub sessions_opened: u32,
    /// Sessions ended by an end frame or a transport disconnect.
    pub sessions_closed: u32,
    /// Sessions ended by the idle reaper.
    pub sessions_expired: u32,
    pub messages_handled: u32,
    pub replies_sent: u32,
    pub reply_failures: u32,
    pub active_sessions: u8,
    pub queue_depth: u8,
}

impl BusStats {
    pub(crate) fn collect(c: &Counters, active_sessions: usize, queue_depth: usize) -> Self {
        Self {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: c.sessions_closed.load(Ordering::Relaxed),
            sessions_expired: c.sessions_expired.load(Ordering::Relaxed),
            messages_handled: c.messages_handled.load(Ordering::Relaxed),
            replies_sent: c.replies_sent.load(Ordering::Relaxed),
            reply_failures: c.reply_failures.load(Ordering::Relaxed),
            active_sessions: active_sessions as u8,
            queue_depth: queue_depth as u8,
        }
    }
}
