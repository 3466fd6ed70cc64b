//! Runtime configuration.
//!
//! Timing parameters for the bus and the wiring of the host simulator.
//! Values can be overridden from a JSON file or a persisted postcard blob.

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Session bus tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Inactivity window after which the reaper expires a session (seconds)
    pub idle_timeout_secs: u32,
    /// Idle reaper sweep interval (milliseconds)
    pub reap_interval_ms: u32,
    /// Voluntary pause between chunks of a multi-frame reply (milliseconds)
    pub chunk_yield_ms: u32,
    /// Stack size of the worker thread (KiB)
    pub worker_stack_kib: u32,
}

impl BusConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.reap_interval_ms))
    }

    pub fn chunk_yield(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_yield_ms))
    }

    /// Reject values that would disable expiry or spin the reaper.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(crate::error::Error::Config("idle_timeout_secs must be > 0"));
        }
        if self.reap_interval_ms == 0 {
            return Err(crate::error::Error::Config("reap_interval_ms must be > 0"));
        }
        if u64::from(self.reap_interval_ms) >= u64::from(self.idle_timeout_secs) * 1000 {
            return Err(crate::error::Error::Config(
                "reap_interval_ms must be shorter than the idle timeout",
            ));
        }
        if self.worker_stack_kib < 4 {
            return Err(crate::error::Error::Config("worker_stack_kib must be >= 4"));
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            reap_interval_ms: 1000, // 1 Hz sweep
            chunk_yield_ms: 5,
            worker_stack_kib: 16,
        }
    }
}

/// Host simulator wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub bus: BusConfig,
    /// Local address of the UDP channel
    pub udp_bind: String,
    /// Frame budget of the UDP channel (bytes, header included)
    pub udp_mtu: u16,
    /// Frame budget of the stdio serial channel (bytes, header included)
    pub serial_mtu: u16,
    /// Pre-shared key for the auth endpoint
    pub psk: String,
}

impl SimConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        self.bus.validate()?;
        if self.udp_mtu < 8 || self.serial_mtu < 8 {
            return Err(crate::error::Error::Config("channel MTU too small"));
        }
        if self.psk.is_empty() || self.psk.len() > 32 {
            return Err(crate::error::Error::Config("psk must be 1..=32 bytes"));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            udp_bind: "127.0.0.1:7531".into(),
            udp_mtu: 512,
            serial_mtu: 256,
            psk: "devbus-sim-psk".into(),
        }
    }
}
