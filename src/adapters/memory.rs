//! RAM-backed coredump and firmware storage.
//!
//! Stand-ins for the coredump partition and the inactive OTA slot when the
//! bus runs on the host (simulator, tests). Both types are cheap handles
//! over shared state, so a test can keep a clone and inspect what the
//! endpoint did.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;

use crate::ports::{CoreDump, FirmwareSink, SinkError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Coredump ─────────────────────────────────────────────────

/// Coredump held in memory.
#[derive(Clone, Default)]
pub struct MemoryCoreDump {
    image: Arc<Mutex<Vec<u8>>>,
}

impl MemoryCoreDump {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image: Arc::new(Mutex::new(image)),
        }
    }
}

impl CoreDump for MemoryCoreDump {
    fn size(&self) -> usize {
        lock(&self.image).len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let image = lock(&self.image);
        let Some(rest) = image.get(offset..) else {
            return 0;
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        n
    }

    fn erase(&self) {
        lock(&self.image).clear();
        info!("COREDUMP: erased");
    }
}

// ── Firmware slot ────────────────────────────────────────────

#[derive(Default)]
struct Slot {
    data: Vec<u8>,
    expected: u32,
    open: bool,
    committed: bool,
}

/// Firmware slot held in memory, with a fixed capacity.
#[derive(Clone)]
pub struct MemoryFirmware {
    capacity: u32,
    slot: Arc<Mutex<Slot>>,
}

impl MemoryFirmware {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Bytes written since the last `begin`.
    pub fn image(&self) -> Vec<u8> {
        lock(&self.slot).data.clone()
    }

    /// Whether the last image was committed.
    pub fn is_committed(&self) -> bool {
        lock(&self.slot).committed
    }

    /// Whether an update is in progress.
    pub fn is_open(&self) -> bool {
        lock(&self.slot).open
    }
}

impl FirmwareSink for MemoryFirmware {
    fn begin(&mut self, size: u32) -> Result<(), SinkError> {
        if size > self.capacity {
            return Err(SinkError::NoSpace);
        }
        let mut slot = lock(&self.slot);
        *slot = Slot {
            data: Vec::with_capacity(size as usize),
            expected: size,
            open: true,
            committed: false,
        };
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let mut slot = lock(&self.slot);
        if !slot.open || slot.data.len() + data.len() > slot.expected as usize {
            return Err(SinkError::WriteFailed);
        }
        slot.data.extend_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let mut slot = lock(&self.slot);
        if !slot.open || slot.data.len() != slot.expected as usize {
            return Err(SinkError::CommitFailed);
        }
        slot.open = false;
        slot.committed = true;
        info!("FIRMWARE: {} byte image committed", slot.data.len());
        Ok(())
    }

    fn abort(&mut self) {
        let mut slot = lock(&self.slot);
        slot.data.clear();
        slot.open = false;
    }
}
