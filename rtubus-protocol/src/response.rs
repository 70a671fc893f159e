//! Master-side response interpretation
//!
//! [`ResponseFrame`] is a read-only view of a received ADU
//! (`[address][pdu...][crc_lo][crc_hi]`). None of its methods perform I/O.

use crate::crc::frame_crc_ok;
use crate::pdu::{EXCEPTION_FLAG, FunctionCode, word_at};

/// Received response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    bytes: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address byte, if any
    pub fn address(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Function code byte, if any
    pub fn function(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    /// Address matches `expected_id` and the trailing CRC is correct
    pub fn verify_integrity(&self, expected_id: u8) -> bool {
        self.address() == Some(expected_id) && frame_crc_ok(self.bytes)
    }

    /// Register values of a read-holding-registers response
    ///
    /// The frame must be `[addr][0x03][2n][n registers][crc]`. A reply
    /// without the byte count is not accepted.
    pub fn read_registers(&self) -> Option<Vec<u16>> {
        let len = self.bytes.len();
        if len < 5 || self.function() != Some(FunctionCode::ReadHoldingRegisters.to_byte()) {
            return None;
        }
        let byte_count = self.bytes[2] as usize;
        if byte_count % 2 != 0 || byte_count != len - 5 {
            return None;
        }
        Some(
            (0..byte_count / 2)
                .map(|i| word_at(self.bytes, 3 + i * 2))
                .collect(),
        )
    }

    /// Whether this is a read-registers response; yields the register count
    ///
    /// The count is the reply's byte count halved.
    pub fn is_read_regs_response(&self) -> Option<usize> {
        self.read_registers().map(|regs| regs.len())
    }

    /// Function code (without the exception bit) and exception code
    pub fn exception(&self) -> Option<(u8, u8)> {
        let function = self.function()?;
        if self.bytes.len() != 5 || function < EXCEPTION_FLAG {
            return None;
        }
        Some((function - EXCEPTION_FLAG, self.bytes[2]))
    }

    /// Echo of a write-single-register request for `address`/`value`
    pub fn is_write_reg_response(&self, address: u16, value: u16) -> bool {
        self.bytes.len() == 8
            && self.function() == Some(FunctionCode::WriteSingleRegister.to_byte())
            && word_at(self.bytes, 2) == address
            && word_at(self.bytes, 4) == value
    }

    /// Acknowledgement of a write-multiple-registers request
    pub fn is_write_regs_response(&self, start: u16, count: u16) -> bool {
        self.bytes.len() == 8
            && self.function() == Some(FunctionCode::WriteMultipleRegisters.to_byte())
            && word_at(self.bytes, 2) == start
            && word_at(self.bytes, 4) == count
    }
}
