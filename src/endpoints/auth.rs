//! Session authentication: challenge-response with HMAC-SHA256.
//!
//! Every session starts locked. To unlock it:
//!
//! 1. Client sends `CHALLENGE`
//! 2. Device replies with a fresh 32-byte nonce
//! 3. Client computes `HMAC-SHA256(psk, nonce)` and sends `VERIFY [tag]`
//! 4. Device verifies the tag and marks the session unlocked
//!
//! A nonce is good for one verify attempt. Verify attempts are token-bucket
//! rate limited per session; an exhausted bucket answers `Locked`.
//!
//! Crypto is handled by the `hmac-sha256` crate: pure Rust and no_std,
//! identical on ESP-IDF and host targets.

use burster::Limiter;
use core::time::Duration;
use log::{debug, info, warn};

use crate::bus::{Endpoint, EndpointId, Outcome, Request, SessionId};

use super::{AccessGate, EP_AUTH, SessionMap};

// ── Commands ─────────────────────────────────────────────────

const CMD_CHALLENGE: u8 = 0x01;
const CMD_VERIFY: u8 = 0x02;
const CMD_LOCK: u8 = 0x03;
const CMD_STATUS: u8 = 0x04;

pub const NONCE_LEN: usize = 32;
pub const TAG_LEN: usize = 32;

/// Maximum pre-shared key length.
pub const MAX_PSK_LEN: usize = 32;

// ── Per-session state ────────────────────────────────────────

struct AuthState {
    nonce: Option<[u8; NONCE_LEN]>,
    unlocked: bool,
    limiter: burster::TokenBucket<fn() -> Duration>,
}

impl AuthState {
    fn new() -> Self {
        Self {
            nonce: None,
            unlocked: false,
            limiter: burster::TokenBucket::new_with_time_provider(
                3,
                3, // 3 verify attempts per second, burst of 3
                platform_now as fn() -> Duration,
            ),
        }
    }
}

// ── Endpoint ─────────────────────────────────────────────────

/// Auth endpoint and the gate the sensitive endpoints consult.
pub struct AuthEndpoint {
    psk: heapless::Vec<u8, MAX_PSK_LEN>,
    sessions: SessionMap<AuthState>,
}

impl AuthEndpoint {
    /// Returns `None` if `psk` is empty or longer than [`MAX_PSK_LEN`].
    pub fn new(psk: &[u8]) -> Option<Self> {
        if psk.is_empty() {
            return None;
        }
        Some(Self {
            psk: heapless::Vec::from_slice(psk).ok()?,
            sessions: SessionMap::new(),
        })
    }

    fn challenge(&self, request: &mut Request<'_>) -> Outcome {
        let sid = request.session();
        let nonce = fill_random_nonce();
        let stored = self
            .sessions
            .with_or_insert(request.bus(), sid, AuthState::new, |s| s.nonce = Some(nonce));
        if stored.is_none() {
            warn!("AUTH[{}]: no room for session state", sid);
            return Outcome::Error;
        }
        if request.reply(&nonce) {
            Outcome::Ok
        } else {
            Outcome::Error
        }
    }

    fn verify(&self, request: &Request<'_>) -> Outcome {
        let sid = request.session();
        let Some(tag) = request.payload().get(1..=TAG_LEN) else {
            return Outcome::Incomplete;
        };
        let Ok(tag) = <&[u8; TAG_LEN]>::try_from(tag) else {
            return Outcome::Incomplete;
        };

        let verdict = self.sessions.with(sid, |s| {
            if s.limiter.try_consume(1).is_err() {
                return Outcome::Locked;
            }
            let Some(nonce) = s.nonce.take() else {
                return Outcome::Invalid;
            };
            if hmac_sha256::HMAC::verify(nonce, &self.psk, tag) {
                s.unlocked = true;
                Outcome::Ack
            } else {
                Outcome::Invalid
            }
        });

        match verdict {
            Some(Outcome::Ack) => info!("AUTH[{}]: unlocked", sid),
            Some(Outcome::Locked) => warn!("AUTH[{}]: verify rate limit exceeded", sid),
            Some(Outcome::Invalid) => warn!("AUTH[{}]: verification failed", sid),
            _ => debug!("AUTH[{}]: verify without challenge", sid),
        }
        verdict.unwrap_or(Outcome::Invalid)
    }
}

impl AccessGate for AuthEndpoint {
    fn is_unlocked(&self, session: SessionId) -> bool {
        self.sessions.with(session, |s| s.unlocked).unwrap_or(false)
    }
}

impl Endpoint for AuthEndpoint {
    fn id(&self) -> EndpointId {
        EP_AUTH
    }

    fn name(&self) -> &'static str {
        "auth"
    }

    fn handle(&self, request: &mut Request<'_>) -> Outcome {
        let Some(&cmd) = request.payload().first() else {
            return Outcome::Incomplete;
        };
        match cmd {
            CMD_CHALLENGE => self.challenge(request),
            CMD_VERIFY => self.verify(request),
            CMD_LOCK => {
                self.sessions.with(request.session(), |s| s.unlocked = false);
                Outcome::Ack
            }
            CMD_STATUS => {
                let unlocked = self.is_unlocked(request.session());
                if request.reply(&[u8::from(unlocked)]) {
                    Outcome::Ok
                } else {
                    Outcome::Error
                }
            }
            _ => Outcome::Unknown,
        }
    }

    fn cleanup(&self, session: SessionId) {
        self.sessions.remove(session);
    }
}

// ── Client side ──────────────────────────────────────────────

/// Compute `HMAC-SHA256(psk, nonce)`, the tag a client sends in `VERIFY`.
pub fn compute_hmac(psk: &[u8], nonce: &[u8; NONCE_LEN]) -> [u8; TAG_LEN] {
    hmac_sha256::HMAC::mac(*nonce, psk)
}

// ── Platform-specific nonce generation ───────────────────────

/// ESP-IDF: delegates to the hardware RNG via `esp_fill_random`.
#[cfg(target_os = "espidf")]
fn fill_random_nonce() -> [u8; NONCE_LEN] {
    let mut buf = [0u8; NONCE_LEN];
    // SAFETY: esp_fill_random writes exactly `len` bytes into the buffer,
    // which is valid and exclusively owned.
    unsafe {
        esp_idf_svc::sys::esp_fill_random(buf.as_mut_ptr().cast(), buf.len());
    }
    buf
}

/// Host entropy: uses `RandomState` to produce non-cryptographic entropy.
#[cfg(not(target_os = "espidf"))]
fn fill_random_nonce() -> [u8; NONCE_LEN] {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut buf = [0u8; NONCE_LEN];
    for chunk in buf.chunks_mut(8) {
        let val = RandomState::new().build_hasher().finish().to_le_bytes();
        let len = chunk.len().min(val.len());
        chunk[..len].copy_from_slice(&val[..len]);
    }
    buf
}

// ── Platform time for the rate limiter ───────────────────────

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────
