//! Function codes, exception codes and request builders
//!
//! A PDU starts with the function code. On the wire it is preceded by the
//! slave address and followed by the CRC, which together form the ADU.

use crate::crc::calc_crc;
use rtubus_core::{RtuError, RtuResult};
use std::fmt;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Largest register count for a read request
pub const MAX_READ_REGS: u16 = 125;

/// Largest register count for a write-multiple request
pub const MAX_WRITE_REGS: u16 = 123;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x06 => Some(Self::WriteSingleRegister),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleRegisters => 0x10,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.to_byte())
    }
}

/// Exception codes carried by exception responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalAddress,
    IllegalValue,
    SlaveFailure,
}

impl ExceptionCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalAddress),
            0x03 => Some(Self::IllegalValue),
            0x04 => Some(Self::SlaveFailure),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalAddress => 0x02,
            Self::IllegalValue => 0x03,
            Self::SlaveFailure => 0x04,
        }
    }
}

/// Big-endian word at `offset`, 0 if out of range
pub fn word_at(bytes: &[u8], offset: usize) -> u16 {
    match bytes.get(offset..offset + 2) {
        Some(pair) => u16::from_be_bytes([pair[0], pair[1]]),
        None => 0,
    }
}

/// PDU for read holding registers
pub fn read_holding_registers(start: u16, count: u16) -> RtuResult<Vec<u8>> {
    if count == 0 || count > MAX_READ_REGS {
        return Err(RtuError::FrameInvalid(format!(
            "Read count must be 1..={}, got {}",
            MAX_READ_REGS, count
        )));
    }
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FunctionCode::ReadHoldingRegisters.to_byte());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    Ok(pdu)
}

/// PDU for write single register
pub fn write_single_register(address: u16, value: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FunctionCode::WriteSingleRegister.to_byte());
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// PDU for write multiple registers
pub fn write_multiple_registers(start: u16, values: &[u16]) -> RtuResult<Vec<u8>> {
    if values.is_empty() || values.len() > MAX_WRITE_REGS as usize {
        return Err(RtuError::FrameInvalid(format!(
            "Write count must be 1..={}, got {}",
            MAX_WRITE_REGS,
            values.len()
        )));
    }
    let count = values.len() as u16;
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FunctionCode::WriteMultipleRegisters.to_byte());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    pdu.push((count * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    Ok(pdu)
}

/// Application data unit: address, PDU and CRC
pub struct Adu;

impl Adu {
    /// Frame `pdu` for `slave`
    pub fn encode(slave: u8, pdu: &[u8]) -> Vec<u8> {
        let mut adu = Vec::with_capacity(pdu.len() + 3);
        adu.push(slave);
        adu.extend_from_slice(pdu);
        adu.extend_from_slice(&calc_crc(slave, pdu).to_le_bytes());
        adu
    }

    /// Split a CRC-checked ADU into address and PDU
    ///
    /// # Errors
    /// Returns `RtuError::FrameInvalid` if the frame is too short or the CRC
    /// does not match
    pub fn decode(adu: &[u8]) -> RtuResult<(u8, &[u8])> {
        if adu.len() < 4 {
            return Err(RtuError::FrameInvalid(format!(
                "Frame too short: {} bytes",
                adu.len()
            )));
        }
        if !crate::crc::frame_crc_ok(adu) {
            return Err(RtuError::FrameInvalid("CRC mismatch".to_string()));
        }
        Ok((adu[0], &adu[1..adu.len() - 2]))
    }
}
