//! Coredump retrieval endpoint.
//!
//! | Cmd    | Request                      | Reply                          |
//! |--------|------------------------------|--------------------------------|
//! | `0x01` | `INFO`                       | `[size:u32]`                   |
//! | `0x02` | `READ [offset:u32][len:u32]` | stream of `[offset:u32][bytes]`|
//! | `0x03` | `ERASE`                      | ack                            |
//!
//! A read is answered with as many frames as it takes, each filled to the
//! session's payload budget. The worker is held for the whole read, so the
//! handler pauses for [`BusConfig::chunk_yield`] between chunks to let
//! transport threads run.
//!
//! [`BusConfig::chunk_yield`]: crate::config::BusConfig::chunk_yield

use std::sync::Arc;

use log::{info, warn};

use crate::bus::{Endpoint, EndpointId, Outcome, Request};
use crate::ports::CoreDump;

use super::{AccessGate, EP_DEBUG, read_u32};

const CMD_INFO: u8 = 0x01;
const CMD_READ: u8 = 0x02;
const CMD_ERASE: u8 = 0x03;

/// Offset prefix of every read chunk.
const CHUNK_HEADER_LEN: usize = 4;

pub struct DebugEndpoint {
    dump: Box<dyn CoreDump>,
    gate: Arc<dyn AccessGate>,
}

impl DebugEndpoint {
    pub fn new(dump: impl CoreDump + 'static, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            dump: Box::new(dump),
            gate,
        }
    }

    fn read(&self, request: &mut Request<'_>) -> Outcome {
        let (Some(offset), Some(len)) = (read_u32(request.payload(), 1), read_u32(request.payload(), 5))
        else {
            return Outcome::Incomplete;
        };
        let size = self.dump.size();
        let start = offset as usize;
        if start > size {
            return Outcome::Invalid;
        }
        let end = start.saturating_add(len as usize).min(size);
        if start == end {
            return Outcome::Ack;
        }

        let chunk_len = request.payload_budget().saturating_sub(CHUNK_HEADER_LEN);
        if chunk_len == 0 {
            return Outcome::Error;
        }

        let pause = request.bus().config().chunk_yield();
        let mut chunk = vec![0u8; CHUNK_HEADER_LEN + chunk_len];
        let mut at = start;
        while at < end {
            let want = chunk_len.min(end - at);
            let n = self.dump.read(at, &mut chunk[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + want]);
            if n == 0 {
                break;
            }
            chunk[..CHUNK_HEADER_LEN].copy_from_slice(&(at as u32).to_le_bytes());
            if !request.reply(&chunk[..CHUNK_HEADER_LEN + n]) {
                warn!("DEBUG[{}]: read aborted at offset {}", request.session(), at);
                return Outcome::Error;
            }
            at += n;
            if at < end && !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
        Outcome::Ok
    }
}

impl Endpoint for DebugEndpoint {
    fn id(&self) -> EndpointId {
        EP_DEBUG
    }

    fn name(&self) -> &'static str {
        "debug"
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let Some(&cmd) = request.payload().first() else {
            return Outcome::Incomplete;
        };
        if !self.gate.is_unlocked(request.session()) {
            return Outcome::Locked;
        }
        match cmd {
            CMD_INFO => {
                let size = self.dump.size() as u32;
                if request.reply(&size.to_le_bytes()) {
                    Outcome::Ok
                } else {
                    Outcome::Error
                }
            }
            CMD_READ => self.read(request),
            CMD_ERASE => {
                self.dump.erase();
                info!("DEBUG[{}]: coredump erased", request.session());
                Outcome::Ack
            }
            _ => Outcome::Unknown,
        }
    }
}
