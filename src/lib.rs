//! devbus: multiplexed session bus for networked embedded controllers.
//!
//! Exposes the bus core, the shipped endpoints and the host adapters for
//! integration testing and the simulator binary. All ESP-IDF-specific code
//! is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod bus;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod ports;
