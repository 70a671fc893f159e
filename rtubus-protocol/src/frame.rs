//! Reusable frame buffer
//!
//! A frame buffer holds one exchange unit. Resetting it to a new length
//! zero-fills the contents; register slots are addressed as big-endian words
//! at `header_bytes + 2 * index`.

use bytes::BytesMut;
use rtubus_core::config::MAX_ADU_LEN;

/// Owned, resizable byte buffer for building and parsing frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bytes: BytesMut,
    max_len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the RTU capacity limit
    pub fn new() -> Self {
        Self::with_capacity_limit(MAX_ADU_LEN)
    }

    /// Create an empty buffer refusing lengths above `max_len`
    pub fn with_capacity_limit(max_len: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(max_len),
            max_len,
        }
    }

    /// Largest length [`FrameBuffer::reset`] accepts
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Resize to exactly `byte_length` zero bytes
    ///
    /// # Returns
    /// `false`, leaving the buffer untouched, if `byte_length` exceeds the limit
    pub fn reset(&mut self, byte_length: usize) -> bool {
        if byte_length > self.max_len {
            return false;
        }
        self.bytes.clear();
        self.bytes.resize(byte_length, 0);
        true
    }

    /// Resize to `header_bytes + 2 * num_regs` zero bytes
    pub fn reset_regs(&mut self, num_regs: usize, header_bytes: usize) -> bool {
        self.reset(header_bytes + num_regs * 2)
    }

    /// Replace the contents with a copy of `data`
    pub fn load(&mut self, data: &[u8]) -> bool {
        if !self.reset(data.len()) {
            return false;
        }
        self.bytes.copy_from_slice(data);
        true
    }

    /// Read the register slot `index` after `header_bytes`, 0 if out of frame
    pub fn reg(&self, index: usize, header_bytes: usize) -> u16 {
        let offset = header_bytes + index * 2;
        match self.bytes.get(offset..offset + 2) {
            Some(pair) => u16::from_be_bytes([pair[0], pair[1]]),
            None => 0,
        }
    }

    /// Write the register slot `index` after `header_bytes`
    ///
    /// # Returns
    /// `false`, without writing, if the slot lies outside the current length
    pub fn set_reg(&mut self, index: usize, value: u16, header_bytes: usize) -> bool {
        let offset = header_bytes + index * 2;
        match self.bytes.get_mut(offset..offset + 2) {
            Some(pair) => {
                pair.copy_from_slice(&value.to_be_bytes());
                true
            }
            None => false,
        }
    }

    /// Set a single byte, `false` if out of frame
    pub fn set_byte(&mut self, offset: usize, value: u8) -> bool {
        match self.bytes.get_mut(offset) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for FrameBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
