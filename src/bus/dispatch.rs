//! Dispatch pipeline, worker, reply path and idle reaper.
//!
//! Inbound frames flow through [`Bus::dispatch`] from any transport
//! context. Control frames (begin / end) are terminated right there under
//! the session lock; data frames are copied into a [`Message`] and queued
//! for the single worker.
//!
//! ```text
//!  channel A ─┐                        ┌──────────────┐
//!  channel B ─┼─▶ dispatch ─▶ queue ──▶│    worker    │──▶ endpoint.handle
//!  channel C ─┘     │  (≤ 8, blocks)   │ (one at a    │        │
//!                   │                  │  time)       │        ▼
//!                   ▼                  └──────────────┘   Bus::send ─▶ channel
//!            begin / end
//!        (synchronous echo)
//! ```
//!
//! The session lock is held only around table lookups and mutations, never
//! while a channel sends or a handler runs, so handlers can call back into
//! [`Bus::send`] without deadlocking. The exception is the cleanup fan-out
//! on end / expiry / disconnect, which runs under the lock so a slot is
//! never reused before every endpoint has forgotten the old session.
//!
//! ## Head-of-line blocking
//!
//! One worker serialises every endpoint invocation system-wide. A handler
//! that streams a large reply delays all other sessions' messages until it
//! returns; chunked handlers should pause between chunks
//! ([`BusConfig::chunk_yield`]) and keep each call bounded.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::TrySendError;
use futures_lite::future::block_on;
use log::{debug, info, warn};

use crate::config::BusConfig;
use crate::ports::Clock;

use super::channel::{Channel, ChannelContext, ChannelId};
use super::endpoint::{EP_BEGIN, EP_CONTROL, EP_END, EndpointId, Message, Outcome, Request};
use super::frame::{self, HEADER_LEN, Header};
use super::registry::Registry;
use super::session::{MAX_SESSIONS, SessionTable};
use super::stats::{BusStats, Counters};
use super::SessionId;

/// Worker queue depth. One pending message per session slot.
pub const QUEUE_DEPTH: usize = MAX_SESSIONS;

type WorkQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, Message, QUEUE_DEPTH>;

/// The session bus.
pub struct Bus {
    config: BusConfig,
    registry: Registry,
    sessions: Mutex<SessionTable>,
    queue: WorkQueue,
    clock: Box<dyn Clock>,
    counters: Counters,
}

impl Bus {
    pub(crate) fn new(config: BusConfig, registry: Registry, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            registry,
            sessions: Mutex::new(SessionTable::new()),
            queue: WorkQueue::new(),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Feed one complete frame received on `channel`.
    ///
    /// Returns `true` if the frame was accepted (session begun, ended, or
    /// a message queued). Rejected frames get no reply. May block while
    /// the worker queue is full.
    pub fn dispatch(&self, channel: ChannelId, bytes: &[u8], context: ChannelContext) -> bool {
        Counters::bump(&self.counters.frames_received);

        let Some(chan) = self.registry.channel(channel) else {
            warn!("BUS: frame on unregistered channel {}", channel);
            return self.drop_frame();
        };

        let Some((header, payload)) = frame::parse(bytes) else {
            debug!("BUS: '{}' bad frame header ({} bytes)", chan.name(), bytes.len());
            return self.drop_frame();
        };

        if header.session == 0 && header.endpoint == EP_BEGIN {
            return self.begin(channel, chan, bytes, context);
        }

        let sid = header.session;
        let now = self.clock.now_ms();
        let mut table = self.table();
        let Some(session) = table.get_on(sid, channel) else {
            debug!("BUS[{}]: no such session on '{}', dropped", sid, chan.name());
            return self.drop_frame();
        };

        if header.endpoint == EP_END {
            self.teardown(&mut table, sid);
            drop(table);
            Counters::bump(&self.counters.sessions_closed);
            info!("BUS[{}]: session ended on '{}'", sid, chan.name());
            self.transmit(chan, &Header::new(sid, EP_END).to_bytes(), &context);
            return true;
        }

        session.last_activity_ms = now;
        drop(table);

        self.enqueue(Message::new(sid, header.endpoint, payload));
        true
    }

    /// Open a session and echo the begin frame with the new id.
    fn begin(
        &self,
        channel: ChannelId,
        chan: &dyn Channel,
        bytes: &[u8],
        context: ChannelContext,
    ) -> bool {
        let now = self.clock.now_ms();
        let opened = self.table().open(channel, context, now);
        let Some(sid) = opened else {
            warn!("BUS: session table full, begin on '{}' dropped", chan.name());
            return self.drop_frame();
        };
        Counters::bump(&self.counters.sessions_opened);
        info!("BUS[{}]: session opened on '{}'", sid, chan.name());

        let mut echo = bytes.to_vec();
        frame::rewrite_session(&mut echo, sid);
        self.transmit(chan, &echo, &context);
        true
    }

    fn enqueue(&self, message: Message) {
        if let Err(TrySendError::Full(message)) = self.queue.try_send(message) {
            debug!("BUS[{}]: worker queue full, waiting", message.session);
            block_on(self.queue.send(message));
        }
    }

    fn drop_frame(&self) -> bool {
        Counters::bump(&self.counters.frames_dropped);
        false
    }

    // ── Worker ────────────────────────────────────────────────

    /// Handle every queued message on the calling thread.
    ///
    /// Returns the number of messages handled. Useful for cooperative
    /// schedulers and deterministic tests; production images run
    /// [`spawn_worker`](Self::spawn_worker) instead.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.queue.try_receive() {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    /// Block the calling thread draining the queue forever.
    pub fn run_worker(&self) {
        info!("BUS: worker started (queue depth {})", QUEUE_DEPTH);
        loop {
            let message = block_on(self.queue.receive());
            self.handle(message);
        }
    }

    /// Start the worker on its own thread.
    pub fn spawn_worker(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let bus = Arc::clone(self);
        std::thread::Builder::new()
            .name("bus-worker".into())
            .stack_size(self.config.worker_stack_kib as usize * 1024)
            .spawn(move || bus.run_worker())
    }

    fn handle(&self, message: Message) {
        let sid = message.session;
        if !self.is_active(sid) {
            debug!("BUS[{}]: session gone before delivery, message dropped", sid);
            return;
        }

        let (outcome, replied) = self.invoke(&message);
        Counters::bump(&self.counters.messages_handled);

        if replied {
            return;
        }
        if let Some(payload) = outcome.control_payload() {
            self.send(sid, EP_CONTROL, payload);
        }
    }

    /// Run the handler for `message`. Returns its outcome and whether it
    /// replied on its own.
    fn invoke(&self, message: &Message) -> (Outcome, bool) {
        if message.endpoint == EP_CONTROL {
            // Client ping.
            return (Outcome::Ack, false);
        }

        let Some(endpoint) = self.registry.endpoint(message.endpoint) else {
            debug!(
                "BUS[{}]: no endpoint 0x{:02X}",
                message.session, message.endpoint
            );
            return (Outcome::Unknown, false);
        };

        let mut request = Request::new(self, message);
        let outcome = endpoint.handle(&mut request);
        if outcome != Outcome::Ok && outcome != Outcome::Ack {
            debug!(
                "BUS[{}]: '{}' returned {:?}",
                message.session,
                endpoint.name(),
                outcome
            );
        }
        (outcome, request.has_replied())
    }

    // ── Reply path ────────────────────────────────────────────

    /// Frame `payload` for `session` / `endpoint` and send it down the
    /// session's channel. Returns the channel's verdict; no retry.
    pub fn send(&self, session: SessionId, endpoint: EndpointId, payload: &[u8]) -> bool {
        let now = self.clock.now_ms();
        let touched = self.table().touch(session, now);
        let Some(s) = touched else {
            debug!("BUS[{}]: reply to unknown session", session);
            Counters::bump(&self.counters.reply_failures);
            return false;
        };
        let Some(chan) = self.registry.channel(s.channel) else {
            return false;
        };

        let mtu = chan.mtu(&s.context);
        if HEADER_LEN + payload.len() > mtu {
            warn!(
                "BUS[{}]: reply of {} bytes exceeds '{}' MTU {}",
                session,
                payload.len(),
                chan.name(),
                mtu
            );
            Counters::bump(&self.counters.reply_failures);
            return false;
        }

        let frame = frame::encode(Header::new(session, endpoint), payload);
        self.transmit(chan, &frame, &s.context)
    }

    /// Send an outbound message.
    pub fn reply(&self, message: &Message) -> bool {
        self.send(message.session, message.endpoint, &message.payload)
    }

    /// Effective frame MTU (header included) of a live session.
    pub fn session_mtu(&self, session: SessionId) -> Option<usize> {
        let s = *self.table().get(session)?;
        self.registry.channel(s.channel).map(|c| c.mtu(&s.context))
    }

    fn transmit(&self, chan: &dyn Channel, frame: &[u8], context: &ChannelContext) -> bool {
        let sent = chan.send(frame, context);
        if sent {
            Counters::bump(&self.counters.replies_sent);
        } else {
            warn!("BUS: '{}' send of {} bytes failed", chan.name(), frame.len());
            Counters::bump(&self.counters.reply_failures);
        }
        sent
    }

    // ── Session teardown ──────────────────────────────────────

    /// Expire every session idle longer than the configured timeout.
    ///
    /// Returns the number of sessions expired.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let timeout_ms = u64::from(self.config.idle_timeout_secs) * 1000;

        let mut table = self.table();
        let idle = table.idle(now, timeout_ms);
        for &sid in &idle {
            self.teardown(&mut table, sid);
            info!("BUS[{}]: expired after {} s idle", sid, self.config.idle_timeout_secs);
        }
        drop(table);

        Counters::add(&self.counters.sessions_expired, idle.len());
        idle.len()
    }

    /// Start the idle reaper on its own thread.
    pub fn spawn_reaper(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let bus = Arc::clone(self);
        let interval = self.config.reap_interval();
        std::thread::Builder::new()
            .name("bus-reaper".into())
            .spawn(move || {
                loop {
                    std::thread::sleep(interval);
                    bus.reap_idle();
                }
            })
    }

    /// End every session bound to a transport connection that went away.
    ///
    /// Transports call this when they tear a connection down, so no
    /// session outlives the context it would reply through.
    pub fn disconnect(&self, channel: ChannelId, context: &ChannelContext) -> usize {
        let mut table = self.table();
        let bound = table.bound_to(channel, context);
        for &sid in &bound {
            self.teardown(&mut table, sid);
        }
        drop(table);

        if !bound.is_empty() {
            info!(
                "BUS: '{}' disconnect ended {} session(s)",
                self.registry.channel_name(channel),
                bound.len()
            );
        }
        Counters::add(&self.counters.sessions_closed, bound.len());
        bound.len()
    }

    fn teardown(&self, table: &mut SessionTable, sid: SessionId) {
        self.registry.cleanup(sid);
        table.close(sid);
    }

    // ── Introspection ─────────────────────────────────────────

    pub fn is_active(&self, session: SessionId) -> bool {
        self.table().get(session).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.table().active_count()
    }

    pub fn stats(&self) -> BusStats {
        let active = self.active_sessions();
        BusStats::collect(&self.counters, active, self.queue.len())
    }

    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
