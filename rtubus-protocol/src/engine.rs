//! Slave-side PDU dispatcher
//!
//! [`ProtocolEngine::receive_pdu`] parses one request PDU, applies it to the
//! register table and leaves the reply in the engine. Requests that cannot be
//! honoured produce an exception reply; nothing here fails on the host side.

use crate::frame::FrameBuffer;
use crate::pdu::{
    EXCEPTION_FLAG, ExceptionCode, FunctionCode, MAX_READ_REGS, MAX_WRITE_REGS, word_at,
};
use rtubus_core::RegisterTable;

/// Largest PDU that fits an RTU frame
pub const MAX_PDU_LEN: usize = 253;

/// Header of a read-registers reply: function code and byte count
const READ_REPLY_HEADER: usize = 2;

/// How the reply to the last request is formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// The engine's frame buffer is the reply
    #[default]
    Normal,
    /// The request is echoed back verbatim
    Echo,
}

/// Holding-register protocol engine
#[derive(Debug, Clone)]
pub struct ProtocolEngine<R> {
    registers: R,
    frame: FrameBuffer,
    request: Vec<u8>,
    reply_mode: ReplyMode,
}

impl<R: RegisterTable> ProtocolEngine<R> {
    /// Create an engine over `registers`
    pub fn new(registers: R) -> Self {
        Self::with_frame_limit(registers, MAX_PDU_LEN)
    }

    /// Create an engine whose reply frame may not exceed `max_len` bytes
    pub fn with_frame_limit(registers: R, max_len: usize) -> Self {
        Self {
            registers,
            frame: FrameBuffer::with_capacity_limit(max_len),
            request: Vec::new(),
            reply_mode: ReplyMode::Normal,
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn reply_mode(&self) -> ReplyMode {
        self.reply_mode
    }

    /// Bytes to send back for the last request
    pub fn reply(&self) -> &[u8] {
        match self.reply_mode {
            ReplyMode::Normal => self.frame.as_slice(),
            ReplyMode::Echo => &self.request,
        }
    }

    /// (Re)allocate the frame to `byte_length` bytes
    pub fn reset_frame(&mut self, byte_length: usize) -> bool {
        self.frame.reset(byte_length)
    }

    /// (Re)allocate the frame to `header_bytes + 2 * num_regs` bytes
    pub fn reset_frame_regs(&mut self, num_regs: usize, header_bytes: usize) -> bool {
        self.frame.reset_regs(num_regs, header_bytes)
    }

    /// Register slot `index` of the frame after `header_bytes`
    pub fn frame_reg(&self, index: usize, header_bytes: usize) -> u16 {
        self.frame.reg(index, header_bytes)
    }

    /// Write register slot `index` of the frame after `header_bytes`
    pub fn set_frame_reg(&mut self, index: usize, value: u16, header_bytes: usize) -> bool {
        self.frame.set_reg(index, value, header_bytes)
    }

    /// Holding register value, 0 if the address is not held
    pub fn hreg(&self, address: u16) -> u16 {
        self.registers.get(address).unwrap_or(0)
    }

    /// Write a holding register, `false` if the address is not held
    pub fn set_hreg(&mut self, address: u16, value: u16) -> bool {
        self.registers.set(address, value)
    }

    /// Whether every address in `[start, start + count)` is held
    pub fn valid_range(&self, start: u16, count: u16) -> bool {
        self.registers.valid_range(start, count)
    }

    /// Apply one request PDU and prepare the reply
    ///
    /// A read reply is `[0x03][2n][n registers]`: it always carries the
    /// byte count ahead of the register values.
    ///
    /// # Returns
    /// `true` if a reply (normal, echo or exception) is ready, `false` for an
    /// empty PDU
    pub fn receive_pdu(&mut self, pdu: &[u8]) -> bool {
        let Some(&fcode) = pdu.first() else {
            return false;
        };
        self.request.clear();
        self.request.extend_from_slice(pdu);
        self.reply_mode = ReplyMode::Normal;

        let field1 = word_at(pdu, 1);
        let field2 = word_at(pdu, 3);

        match FunctionCode::from_byte(fcode) {
            Some(FunctionCode::WriteSingleRegister) => {
                self.write_single_register(fcode, pdu, field1, field2)
            }
            Some(FunctionCode::ReadHoldingRegisters) => {
                self.read_holding_registers(fcode, pdu, field1, field2)
            }
            Some(FunctionCode::WriteMultipleRegisters) => {
                self.write_multiple_registers(fcode, pdu, field1, field2)
            }
            None => self.exception_response(fcode, ExceptionCode::IllegalFunction),
        }
        true
    }

    /// Replace the reply with `[fcode | 0x80, code]`
    pub fn exception_response(&mut self, fcode: u8, code: ExceptionCode) {
        log::debug!(
            "Exception reply to function 0x{:02X}: {:?}",
            fcode,
            code
        );
        self.frame.load(&[fcode | EXCEPTION_FLAG, code.to_byte()]);
        self.reply_mode = ReplyMode::Normal;
    }

    fn write_single_register(&mut self, fcode: u8, pdu: &[u8], address: u16, value: u16) {
        if pdu.len() != 5 {
            return self.exception_response(fcode, ExceptionCode::IllegalValue);
        }
        if !self.set_hreg(address, value) {
            return self.exception_response(fcode, ExceptionCode::IllegalAddress);
        }
        if self.hreg(address) != value {
            return self.exception_response(fcode, ExceptionCode::SlaveFailure);
        }
        self.reply_mode = ReplyMode::Echo;
    }

    fn read_holding_registers(&mut self, fcode: u8, pdu: &[u8], start: u16, count: u16) {
        if pdu.len() != 5 || count == 0 || count > MAX_READ_REGS {
            return self.exception_response(fcode, ExceptionCode::IllegalValue);
        }
        if !self.valid_range(start, count) {
            return self.exception_response(fcode, ExceptionCode::IllegalAddress);
        }
        if !self.reset_frame_regs(count as usize, READ_REPLY_HEADER) {
            return self.exception_response(fcode, ExceptionCode::SlaveFailure);
        }
        self.frame.set_byte(0, fcode);
        self.frame.set_byte(1, (count * 2) as u8);
        for i in 0..count {
            let value = self.hreg(start + i);
            self.frame.set_reg(i as usize, value, READ_REPLY_HEADER);
        }
    }

    fn write_multiple_registers(&mut self, fcode: u8, pdu: &[u8], start: u16, count: u16) {
        let byte_count = pdu.get(5).copied().unwrap_or(0) as usize;
        if count == 0
            || count > MAX_WRITE_REGS
            || byte_count != count as usize * 2
            || pdu.len() < 6 + byte_count
        {
            return self.exception_response(fcode, ExceptionCode::IllegalValue);
        }
        if !self.valid_range(start, count) {
            return self.exception_response(fcode, ExceptionCode::IllegalAddress);
        }
        for i in 0..count {
            let value = word_at(pdu, 6 + i as usize * 2);
            self.set_hreg(start + i, value);
        }
        if !self.reset_frame(5) {
            return self.exception_response(fcode, ExceptionCode::SlaveFailure);
        }
        self.frame.set_byte(0, fcode);
        self.frame.set_reg(0, start, 1);
        self.frame.set_reg(1, count, 1);
    }
}
