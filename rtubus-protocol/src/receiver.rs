//! Frame assembly from a byte stream
//!
//! RTU frames carry no delimiter. The receiver collects bytes and declares a
//! frame complete once the line has been silent for the inter-frame timeout.

use bytes::{Bytes, BytesMut};
use rtubus_core::Clock;
use rtubus_transport::Transport;
use std::time::Duration;

/// Result of one receiver poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// No complete frame yet
    Pending,
    /// A complete frame
    Frame(Bytes),
    /// Input exceeded the size limit and was discarded
    Overflow,
}

/// Non-blocking frame assembler
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    buffer: BytesMut,
    last_byte_at: Option<Duration>,
    inter_frame_timeout: Duration,
    max_len: usize,
    overflowed: bool,
}

impl FrameReceiver {
    pub fn new(inter_frame_timeout: Duration, max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_len),
            last_byte_at: None,
            inter_frame_timeout,
            max_len,
            overflowed: false,
        }
    }

    /// Forget any partially received frame
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_byte_at = None;
        self.overflowed = false;
    }

    /// Bytes collected for the frame in progress
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drain pending input and report a frame once the line goes quiet
    pub fn poll<T, C>(&mut self, transport: &mut T, clock: &C) -> Received
    where
        T: Transport + ?Sized,
        C: Clock + ?Sized,
    {
        let mut got_bytes = false;
        while let Some(byte) = transport.read() {
            got_bytes = true;
            if self.buffer.len() < self.max_len {
                self.buffer.extend_from_slice(&[byte]);
            } else {
                self.overflowed = true;
            }
        }
        let now = clock.now();
        if got_bytes {
            self.last_byte_at = Some(now);
            return Received::Pending;
        }

        let Some(last) = self.last_byte_at else {
            return Received::Pending;
        };
        if now.saturating_sub(last) < self.inter_frame_timeout {
            return Received::Pending;
        }

        let overflowed = self.overflowed;
        let frame = self.buffer.split().freeze();
        self.clear();
        if overflowed {
            log::debug!("Discarded oversized frame");
            Received::Overflow
        } else {
            log::trace!("Received frame {:02X?}", frame.as_ref());
            Received::Frame(frame)
        }
    }
}
