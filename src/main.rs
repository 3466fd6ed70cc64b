//! devbus-sim: host simulator of a bus-enabled device.
//!
//! Runs two buses in one process: a gateway reachable over UDP and over
//! stdio, and a neighbour only reachable through the gateway's relay.
//!
//! ```text
//!  UDP client ──┐      ┌──────────────────────────┐  hub  ┌────────────────┐
//!               ├─────▶│ gateway bus  (peer 0001) │◀─────▶│ neighbour bus  │
//!  stdio frames ┘      │ auth debug metrics       │       │ (peer 0002)    │
//!                      │ update relay             │       │ auth metrics   │
//!                      └──────────────────────────┘       └────────────────┘
//! ```
//!
//! Usage: `devbus-sim [config.json]`. Logs go to stderr (`RUST_LOG`,
//! default `info`); stdout carries the length-prefixed serial channel.
#![deny(unused_must_use)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use log::info;

use devbus::adapters::link::{self, LinkHub};
use devbus::adapters::memory::{MemoryCoreDump, MemoryFirmware};
use devbus::adapters::serial::{self, StreamChannel};
use devbus::adapters::time::MonotonicClock;
use devbus::adapters::udp::UdpChannel;
use devbus::bus::{Bus, BusBuilder};
use devbus::config::SimConfig;
use devbus::endpoints::auth::AuthEndpoint;
use devbus::endpoints::debug::DebugEndpoint;
use devbus::endpoints::metrics::MetricsEndpoint;
use devbus::endpoints::relay::Relay;
use devbus::endpoints::update::UpdateEndpoint;
use devbus::endpoints::{AccessGate, Open};
use devbus::ports::PeerId;

const GATEWAY_ADDR: PeerId = 0x0001;
const NEIGHBOUR_ADDR: PeerId = 0x0002;
const LINK_MTU: usize = 250;
const FIRMWARE_SLOT: u32 = 1024 * 1024;
const COREDUMP_SIZE: u32 = 4096;

fn load_config() -> Result<SimConfig> {
    let Some(path) = std::env::args().nth(1) else {
        info!("No config file given, using defaults");
        return Ok(SimConfig::default());
    };
    let text = std::fs::read_to_string(&path)?;
    let config = serde_json::from_str(&text).map_err(|e| anyhow!("{}: {}", path, e))?;
    info!("Config loaded from {}", path);
    Ok(config)
}

fn auth_for(config: &SimConfig) -> Result<Arc<AuthEndpoint>> {
    AuthEndpoint::new(config.psk.as_bytes())
        .map(Arc::new)
        .ok_or_else(|| anyhow!("psk must be 1..=32 bytes"))
}

/// Neighbour device: relay channel plus auth and metrics.
fn start_neighbour(config: &SimConfig, hub: &LinkHub) -> Result<Arc<Bus>> {
    let (uplink, inbox) = hub.attach(NEIGHBOUR_ADDR, LINK_MTU);
    // Only the channel is registered here, so the gate is never consulted.
    let relay = Arc::new(Relay::new(Arc::new(uplink), Arc::new(Open)));

    let mut builder = BusBuilder::new(&config.bus);
    let relay_ch = builder.register_channel(relay.channel())?;
    builder.register_endpoint(auth_for(config)?)?;
    builder.register_endpoint(MetricsEndpoint)?;
    let bus = builder.build(MonotonicClock::new());

    let _worker = bus.spawn_worker()?;
    let _reaper = bus.spawn_reaper()?;
    let _rx = link::pump(Arc::clone(&bus), relay, relay_ch, inbox)?;
    info!("Neighbour {:04X} up", NEIGHBOUR_ADDR);
    Ok(bus)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("devbus-sim v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    config.validate()?;

    let hub = LinkHub::new();
    let _neighbour = start_neighbour(&config, &hub)?;

    // ── Gateway ───────────────────────────────────────────────
    let auth = auth_for(&config)?;
    let gate: Arc<dyn AccessGate> = auth.clone();
    let (uplink, inbox) = hub.attach(GATEWAY_ADDR, LINK_MTU);
    let relay = Arc::new(Relay::new(Arc::new(uplink), Arc::clone(&gate)));

    let bind: SocketAddr = config.udp_bind.parse()?;
    let udp = Arc::new(UdpChannel::bind(bind, config.udp_mtu as usize)?);
    let serial_mtu = config.serial_mtu as usize;

    let mut builder = BusBuilder::new(&config.bus);
    let udp_ch = builder.register_channel(Arc::clone(&udp))?;
    let serial_ch = builder.register_channel(StreamChannel::new("stdio", serial_mtu, std::io::stdout()))?;
    let relay_ch = builder.register_channel(relay.channel())?;

    let coredump: Vec<u8> = (0..COREDUMP_SIZE).map(|i| i as u8).collect();
    builder.register_endpoint(Arc::clone(&auth))?;
    builder.register_endpoint(DebugEndpoint::new(MemoryCoreDump::new(coredump), Arc::clone(&gate)))?;
    builder.register_endpoint(MetricsEndpoint)?;
    builder.register_endpoint(UpdateEndpoint::new(MemoryFirmware::new(FIRMWARE_SLOT), gate))?;
    builder.register_endpoint(Arc::clone(&relay))?;
    let bus = builder.build(MonotonicClock::new());

    let _worker = bus.spawn_worker()?;
    let _reaper = bus.spawn_reaper()?;
    let _relay_rx = link::pump(Arc::clone(&bus), relay, relay_ch, inbox)?;

    let serial_bus = Arc::clone(&bus);
    let _serial_rx = std::thread::Builder::new()
        .name("serial-rx".into())
        .spawn(move || {
            if let Err(e) = serial::pump(&serial_bus, serial_ch, std::io::stdin(), serial_mtu) {
                log::warn!("stdio channel failed: {}", e);
            }
        })?;

    info!("Gateway {:04X} up, udp {}", GATEWAY_ADDR, udp.local_addr()?);
    udp.serve(&bus, udp_ch)?;
    Ok(())
}
