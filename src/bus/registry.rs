//! Channel and endpoint registries.
//!
//! Both tables are filled during single-threaded start-up through
//! [`BusBuilder`] and frozen into the [`Bus`] by [`BusBuilder::build`].
//! There is no runtime registration or unregistration, so lookups after
//! start-up need no lock.

use std::sync::Arc;

use log::info;

use crate::config::BusConfig;
use crate::error::{RegistryError, Result};
use crate::ports::Clock;

use super::channel::{Channel, ChannelId};
use super::dispatch::Bus;
use super::endpoint::{is_reserved, Endpoint, EndpointId};
use super::SessionId;

/// Channel table capacity.
pub const MAX_CHANNELS: usize = 8;

/// Endpoint table capacity.
pub const MAX_ENDPOINTS: usize = 32;

/// Frozen channel and endpoint tables.
pub(crate) struct Registry {
    channels: heapless::Vec<Box<dyn Channel>, MAX_CHANNELS>,
    endpoints: heapless::Vec<Box<dyn Endpoint>, MAX_ENDPOINTS>,
}

impl Registry {
    fn new() -> Self {
        Self {
            channels: heapless::Vec::new(),
            endpoints: heapless::Vec::new(),
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&dyn Channel> {
        self.channels.get(id as usize).map(|c| &**c)
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&dyn Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.id() == id)
            .map(|e| &**e)
    }

    /// Run every endpoint's cleanup hook for `session`, in registration order.
    pub fn cleanup(&self, session: SessionId) {
        for endpoint in &self.endpoints {
            endpoint.cleanup(session);
        }
    }

    pub fn channel_name(&self, id: ChannelId) -> &'static str {
        self.channel(id).map_or("?", |c| c.name())
    }
}

/// Start-up builder for a [`Bus`].
///
/// ```no_run
/// # use devbus::bus::BusBuilder;
/// # use devbus::config::BusConfig;
/// # use devbus::adapters::time::MonotonicClock;
/// let mut builder = BusBuilder::new(&BusConfig::default());
/// // builder.register_channel(...)?; builder.register_endpoint(...)?;
/// let bus = builder.build(MonotonicClock::new());
/// # let _ = bus;
/// ```
pub struct BusBuilder {
    config: BusConfig,
    registry: Registry,
}

impl BusBuilder {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            config: config.clone(),
            registry: Registry::new(),
        }
    }

    /// Add a channel. Returns the id inbound frames must be tagged with.
    pub fn register_channel(&mut self, channel: impl Channel + 'static) -> Result<ChannelId> {
        let id = self.registry.channels.len() as ChannelId;
        let name = channel.name();
        self.registry
            .channels
            .push(Box::new(channel))
            .map_err(|_| RegistryError::ChannelTableFull)?;
        info!("BUS: channel {} '{}' registered", id, name);
        Ok(id)
    }

    /// Add an endpoint under its ref.
    ///
    /// Rejects the bus control refs and refs that are already taken.
    pub fn register_endpoint(&mut self, endpoint: impl Endpoint + 'static) -> Result<()> {
        let id = endpoint.id();
        if is_reserved(id) {
            return Err(RegistryError::ReservedEndpoint(id).into());
        }
        if self.registry.endpoint(id).is_some() {
            return Err(RegistryError::DuplicateEndpoint(id).into());
        }
        let name = endpoint.name();
        self.registry
            .endpoints
            .push(Box::new(endpoint))
            .map_err(|_| RegistryError::EndpointTableFull)?;
        info!("BUS: endpoint 0x{:02X} '{}' registered", id, name);
        Ok(())
    }

    /// Freeze the tables and create the bus.
    pub fn build(self, clock: impl Clock + 'static) -> Arc<Bus> {
        info!(
            "BUS: {} channels, {} endpoints",
            self.registry.channels.len(),
            self.registry.endpoints.len()
        );
        Arc::new(Bus::new(self.config, self.registry, Box::new(clock)))
    }
}

// ── Tests ────────────────────────────────────────────────────
