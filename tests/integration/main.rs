//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below maps to a file that exercises one part of the bus
//! against recording channels and in-memory adapters. Everything runs on
//! the host; the UDP tests use loopback sockets.

mod mock_channel;
mod relay_tests;
mod transport_tests;
