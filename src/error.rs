//! Unified error types for the session bus.
//!
//! A single `Error` enum that every start-up path funnels into. All variants
//! are `Copy` so they can be returned from registration without allocation.
//! Runtime protocol failures are not errors here: they surface to clients as
//! [`Outcome`](crate::bus::Outcome) codes or are dropped silently.

use core::fmt;

use crate::bus::EndpointId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible start-up operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Channel or endpoint registration was rejected.
    Registry(RegistryError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Registration failures. These are configuration bugs: the start-up path
/// propagates them and the image refuses to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// More channels than the table holds.
    ChannelTableFull,
    /// More endpoints than the table holds.
    EndpointTableFull,
    /// The endpoint ref is one of the bus control refs.
    ReservedEndpoint(EndpointId),
    /// Another endpoint already claimed this ref.
    DuplicateEndpoint(EndpointId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelTableFull => write!(f, "channel table full"),
            Self::EndpointTableFull => write!(f, "endpoint table full"),
            Self::ReservedEndpoint(id) => write!(f, "endpoint ref 0x{id:02X} is reserved"),
            Self::DuplicateEndpoint(id) => write!(f, "endpoint ref 0x{id:02X} already registered"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
