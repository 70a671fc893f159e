//! In-memory half-duplex line
//!
//! [`MemoryLine::pair`] returns two cross-connected ends: bytes written on one
//! end become readable on the other while that end is listening. The ends can
//! be driven from one thread or moved to two.

use crate::transport::Transport;
use rtubus_core::{RtuError, RtuResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Endpoint {
    inbox: Mutex<VecDeque<u8>>,
    listening: AtomicBool,
}

impl Endpoint {
    fn inbox(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One end of an in-memory line
#[derive(Debug)]
pub struct MemoryLine {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
    open: bool,
    transmitting: bool,
    bytes_written: u64,
}

impl MemoryLine {
    /// Create two connected, open and listening ends
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        let mut left = Self::end_of(a.clone(), b.clone());
        let mut right = Self::end_of(b, a);
        left.open();
        right.open();
        (left, right)
    }

    fn end_of(local: Arc<Endpoint>, remote: Arc<Endpoint>) -> Self {
        Self {
            local,
            remote,
            open: false,
            transmitting: false,
            bytes_written: 0,
        }
    }

    fn open(&mut self) {
        self.open = true;
        self.local.listening.store(true, Ordering::SeqCst);
    }

    /// Inject bytes as if the remote end had written them
    pub fn inject(&self, bytes: &[u8]) {
        self.local.inbox().extend(bytes.iter().copied());
    }

    /// Total bytes written through this end
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether this end is between `begin_transmission` and `end_transmission`
    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }
}

impl Transport for MemoryLine {
    fn begin(&mut self, _baud_rate: u32) -> RtuResult<()> {
        self.open();
        Ok(())
    }

    fn end(&mut self) {
        self.open = false;
        self.local.listening.store(false, Ordering::SeqCst);
        self.local.inbox().clear();
    }

    fn listen(&mut self) {
        if self.open {
            self.local.listening.store(true, Ordering::SeqCst);
        }
    }

    fn stop_listening(&mut self) {
        self.local.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.local.listening.load(Ordering::SeqCst)
    }

    fn write(&mut self, byte: u8) -> RtuResult<usize> {
        if !self.open {
            return Err(RtuError::NotOpen);
        }
        self.bytes_written += 1;
        // Bytes sent while the far end is deaf are lost on the wire
        if self.remote.listening.load(Ordering::SeqCst) {
            self.remote.inbox().push_back(byte);
        }
        Ok(1)
    }

    fn read(&mut self) -> Option<u8> {
        if !self.open {
            return None;
        }
        self.local.inbox().pop_front()
    }

    fn available(&self) -> usize {
        if !self.open {
            return 0;
        }
        self.local.inbox().len()
    }

    fn begin_transmission(&mut self) -> RtuResult<()> {
        self.transmitting = true;
        Ok(())
    }

    fn end_transmission(&mut self) -> RtuResult<()> {
        self.transmitting = false;
        Ok(())
    }
}
