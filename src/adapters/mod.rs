//! Adapters: concrete implementations of the bus channel and port traits.
//!
//! | Adapter   | Implements            | Connects to                  |
//! |-----------|-----------------------|------------------------------|
//! | `link`    | RelayLink             | In-process peer hub          |
//! | `memory`  | CoreDump              | RAM image (host)             |
//! |           | FirmwareSink          | RAM slot (host)              |
//! | `serial`  | Channel               | Length-prefixed byte stream  |
//! | `time`    | Clock                 | ESP32 system timer / Instant |
//! | `udp`     | Channel               | UDP socket                   |

pub mod link;
pub mod memory;
pub mod serial;
pub mod time;
pub mod udp;
