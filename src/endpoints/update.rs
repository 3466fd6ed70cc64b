//! Firmware update endpoint.
//!
//! Flow: BEGIN → N × WRITE → FINISH
//!
//! ```text
//!   Idle ──BEGIN──▶ Receiving ──FINISH──▶ Verifying ──▶ Ready
//!    ▲                  │                     │
//!    └──ABORT / owner───┘                     └──▶ Failed
//!       session ends
//! ```
//!
//! One session owns an update at a time. Chunks must arrive strictly in
//! order. FINISH checks the SHA-256 announced at BEGIN before the sink
//! marks the image bootable. Gated: the session must be unlocked.

use core::fmt;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::bus::{Endpoint, EndpointId, Outcome, Request, SessionId};
use crate::ports::{FirmwareSink, SinkError};

use super::{AccessGate, EP_UPDATE, lock, read_u32};

const CMD_BEGIN: u8 = 0x01;
const CMD_WRITE: u8 = 0x02;
const CMD_FINISH: u8 = 0x03;
const CMD_ABORT: u8 = 0x04;
const CMD_STATUS: u8 = 0x05;

const MAX_FIRMWARE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Another session owns the update in progress.
    Busy,
    InvalidSize,
    NotReceiving,
    NonSequential,
    Overflow,
    IncompleteTransfer,
    HashMismatch,
    Sink(SinkError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "update owned by another session"),
            Self::InvalidSize => write!(f, "firmware size out of range (max 4 MB)"),
            Self::NotReceiving => write!(f, "no update in progress"),
            Self::NonSequential => write!(f, "chunk offset does not match expected offset"),
            Self::Overflow => write!(f, "chunk would exceed declared firmware size"),
            Self::IncompleteTransfer => write!(f, "finish before all bytes written"),
            Self::HashMismatch => write!(f, "SHA-256 mismatch"),
            Self::Sink(e) => write!(f, "sink: {e}"),
        }
    }
}

impl From<SinkError> for UpdateError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

impl From<UpdateError> for Outcome {
    fn from(e: UpdateError) -> Self {
        match e {
            UpdateError::Busy | UpdateError::HashMismatch | UpdateError::Sink(_) => Outcome::Error,
            UpdateError::InvalidSize
            | UpdateError::NotReceiving
            | UpdateError::NonSequential
            | UpdateError::Overflow
            | UpdateError::IncompleteTransfer => Outcome::Invalid,
        }
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Receiving { size: u32, written: u32 },
    Verifying { size: u32 },
    Ready { size: u32 },
    Failed,
}

impl UpdateState {
    /// Wire code used in `STATUS` replies.
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Receiving { .. } => 1,
            Self::Verifying { .. } => 2,
            Self::Ready { .. } => 3,
            Self::Failed => 4,
        }
    }

    fn progress(self) -> (u32, u32) {
        match self {
            Self::Idle | Self::Failed => (0, 0),
            Self::Receiving { size, written } => (written, size),
            Self::Verifying { size } | Self::Ready { size } => (size, size),
        }
    }
}

/// Update session bookkeeping plus the sink it writes to.
pub struct Updater {
    state: UpdateState,
    owner: Option<SessionId>,
    expected_sha256: [u8; 32],
    hasher: hmac_sha256::Hash,
    sink: Box<dyn FirmwareSink>,
}

impl Updater {
    pub fn new(sink: impl FirmwareSink + 'static) -> Self {
        Self {
            state: UpdateState::Idle,
            owner: None,
            expected_sha256: [0; 32],
            hasher: hmac_sha256::Hash::new(),
            sink: Box::new(sink),
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    fn check_owner(&self, session: SessionId) -> Result<(), UpdateError> {
        match (self.state, self.owner) {
            (UpdateState::Receiving { .. }, Some(owner)) if owner != session => Err(UpdateError::Busy),
            _ => Ok(()),
        }
    }

    pub fn begin(&mut self, session: SessionId, size: u32, sha256: [u8; 32]) -> Result<(), UpdateError> {
        self.check_owner(session)?;
        if size == 0 || size > MAX_FIRMWARE_SIZE {
            return Err(UpdateError::InvalidSize);
        }
        if matches!(self.state, UpdateState::Receiving { .. }) {
            // Owner restarting.
            self.sink.abort();
        }

        if let Err(e) = self.sink.begin(size) {
            self.fail();
            return Err(e.into());
        }
        self.expected_sha256 = sha256;
        self.hasher = hmac_sha256::Hash::new();
        self.owner = Some(session);
        self.state = UpdateState::Receiving { size, written: 0 };
        info!("UPDATE[{}]: begin ({} bytes)", session, size);
        Ok(())
    }

    /// Write a chunk at `offset`. Returns total bytes written.
    pub fn write(&mut self, session: SessionId, offset: u32, data: &[u8]) -> Result<u32, UpdateError> {
        self.check_owner(session)?;
        let UpdateState::Receiving { size, written } = self.state else {
            return Err(UpdateError::NotReceiving);
        };
        if offset != written {
            return Err(UpdateError::NonSequential);
        }
        let Some(total) = u32::try_from(data.len())
            .ok()
            .and_then(|n| written.checked_add(n))
            .filter(|&t| t <= size)
        else {
            return Err(UpdateError::Overflow);
        };

        if let Err(e) = self.sink.write(data) {
            warn!("UPDATE[{}]: write at {} failed: {}", session, offset, e);
            self.sink.abort();
            self.fail();
            return Err(e.into());
        }
        self.hasher.update(data);
        self.state = UpdateState::Receiving { size, written: total };
        Ok(total)
    }

    /// Verify the image and mark it bootable.
    pub fn finish(&mut self, session: SessionId) -> Result<(), UpdateError> {
        self.check_owner(session)?;
        let size = match self.state {
            UpdateState::Receiving { size, written } if written == size => size,
            UpdateState::Receiving { .. } => return Err(UpdateError::IncompleteTransfer),
            _ => return Err(UpdateError::NotReceiving),
        };

        self.state = UpdateState::Verifying { size };
        let digest = core::mem::replace(&mut self.hasher, hmac_sha256::Hash::new()).finalize();
        if digest != self.expected_sha256 {
            warn!("UPDATE[{}]: SHA-256 mismatch", session);
            self.sink.abort();
            self.fail();
            return Err(UpdateError::HashMismatch);
        }
        if let Err(e) = self.sink.commit() {
            warn!("UPDATE[{}]: commit failed: {}", session, e);
            self.fail();
            return Err(e.into());
        }

        self.state = UpdateState::Ready { size };
        self.owner = None;
        info!("UPDATE[{}]: image verified, ready to boot", session);
        Ok(())
    }

    pub fn abort(&mut self, session: SessionId) -> Result<(), UpdateError> {
        self.check_owner(session)?;
        if matches!(self.state, UpdateState::Receiving { .. }) {
            self.sink.abort();
            info!("UPDATE[{}]: aborted", session);
        }
        self.state = UpdateState::Idle;
        self.owner = None;
        Ok(())
    }

    /// Drop the update if `session` owned it.
    pub fn release(&mut self, session: SessionId) {
        if self.owner == Some(session) && matches!(self.state, UpdateState::Receiving { .. }) {
            self.sink.abort();
            self.state = UpdateState::Idle;
            info!("UPDATE[{}]: owner gone, update aborted", session);
        }
        if self.owner == Some(session) {
            self.owner = None;
        }
    }

    fn fail(&mut self) {
        self.state = UpdateState::Failed;
        self.owner = None;
    }
}

// ── Endpoint ─────────────────────────────────────────────────

pub struct UpdateEndpoint {
    updater: Mutex<Updater>,
    gate: Arc<dyn AccessGate>,
}

impl UpdateEndpoint {
    pub fn new(sink: impl FirmwareSink + 'static, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            updater: Mutex::new(Updater::new(sink)),
            gate,
        }
    }

    pub fn state(&self) -> UpdateState {
        lock(&self.updater).state()
    }

    fn run(&self, request: &Request<'_>, cmd: u8) -> Result<Option<[u8; 9]>, UpdateError> {
        let sid = request.session();
        let payload = request.payload();
        let mut updater = lock(&self.updater);
        match cmd {
            CMD_BEGIN => {
                let (Some(size), Some(sha)) = (read_u32(payload, 1), payload.get(5..37)) else {
                    return Ok(None);
                };
                let mut sha256 = [0u8; 32];
                sha256.copy_from_slice(sha);
                updater.begin(sid, size, sha256)?;
            }
            CMD_WRITE => {
                let Some(offset) = read_u32(payload, 1) else {
                    return Ok(None);
                };
                updater.write(sid, offset, &payload[5..])?;
            }
            CMD_FINISH => updater.finish(sid)?,
            CMD_ABORT => updater.abort(sid)?,
            CMD_STATUS => {
                let state = updater.state();
                let (written, size) = state.progress();
                let mut status = [0u8; 9];
                status[0] = state.code();
                status[1..5].copy_from_slice(&written.to_le_bytes());
                status[5..9].copy_from_slice(&size.to_le_bytes());
                return Ok(Some(status));
            }
            _ => {}
        }
        Ok(None)
    }
}

impl Endpoint for UpdateEndpoint {
    fn id(&self) -> EndpointId {
        EP_UPDATE
    }

    fn name(&self) -> &'static str {
        "update"
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let Some(&cmd) = request.payload().first() else {
            return Outcome::Incomplete;
        };
        if !self.gate.is_unlocked(request.session()) {
            return Outcome::Locked;
        }
        let needed = match cmd {
            CMD_BEGIN => 37,
            CMD_WRITE => 5,
            CMD_FINISH | CMD_ABORT | CMD_STATUS => 1,
            _ => return Outcome::Unknown,
        };
        if request.payload().len() < needed {
            return Outcome::Incomplete;
        }

        match self.run(request, cmd) {
            Ok(Some(status)) => {
                if request.reply(&status) {
                    Outcome::Ok
                } else {
                    Outcome::Error
                }
            }
            Ok(None) => Outcome::Ack,
            Err(e) => {
                warn!("UPDATE[{}]: {}", request.session(), e);
                e.into()
            }
        }
    }

    fn cleanup(&self, session: SessionId) {
        lock(&self.updater).release(session);
    }
}
