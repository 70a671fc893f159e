//! Holding-register layout shared by master and slave
//!
//! ```text
//! 0x0000  protocol version           (read only)
//! 0x0001  number of devices          (read only)
//! 0x0002  slave id                   (write re-addresses the slave)
//! 0x0003  device name length, bytes  (read only)
//! 0x0004  clock, seconds, high word
//! 0x0005  clock, seconds, low word
//! 0x0006  status
//! 0x0007  reserved
//! 0x0010 + 0x10 * i   device block i
//!         +0 type, +1 data registers, +2 device number, +3.. name
//! 0x0100  data request: row, start hi, start lo, page, max points
//! 0x0110  data reply:   count, pages remaining, point bits, payload...
//! 0x0200  data in:      row, byte length, status, payload...
//! ```

/// Version of this register layout
pub const PROTOCOL_VERSION: u16 = 1;

/// Address answered by a slave that has not been assigned an id
pub const NEW_SLAVE_ID: u8 = 1;

/// Address processed by every slave and never answered
pub const BROADCAST_ID: u8 = 0;

/// Lowest id handed out to onboarded slaves
pub const FIRST_ASSIGNED_ID: u8 = 2;

/// Highest valid RTU slave address
pub const LAST_ASSIGNED_ID: u8 = 247;

pub const REG_PROTOCOL_VERSION: u16 = 0x0000;
pub const REG_DEVICE_COUNT: u16 = 0x0001;
pub const REG_SLAVE_ID: u16 = 0x0002;
pub const REG_NAME_LENGTH: u16 = 0x0003;
pub const REG_CLOCK: u16 = 0x0004;
pub const REG_STATUS: u16 = 0x0006;

/// Registers read by discovery
pub const HEADER_REGS: u16 = 8;

pub const DEVICE_BASE: u16 = 0x0010;
pub const DEVICE_STRIDE: u16 = 0x0010;
pub const MAX_DEVICES: u16 = 8;

pub const DEVICE_TYPE_OFFSET: u16 = 0;
pub const DEVICE_REGS_OFFSET: u16 = 1;
pub const DEVICE_NUMBER_OFFSET: u16 = 2;
pub const DEVICE_NAME_OFFSET: u16 = 3;

/// Device number of a block the master has not assigned yet
pub const NO_DEVICE_NUMBER: u16 = 0xFFFF;

/// Longest device name a device block can carry
pub const MAX_NAME_LEN: usize = ((DEVICE_STRIDE - DEVICE_NAME_OFFSET) * 2) as usize;

pub const DATA_REQUEST: u16 = 0x0100;
pub const DATA_REQUEST_REGS: u16 = 5;

pub const DATA_REPLY: u16 = 0x0110;
pub const DATA_REPLY_HEADER_REGS: u16 = 3;
pub const DATA_PAYLOAD_REGS: u16 = 64;

pub const DATA_IN: u16 = 0x0200;
pub const DATA_IN_ROW_OFFSET: u16 = 0;
pub const DATA_IN_LENGTH_OFFSET: u16 = 1;
pub const DATA_IN_STATUS_OFFSET: u16 = 2;
pub const DATA_IN_HEADER_REGS: u16 = 3;

/// Outcome of data pushed through the data-in window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReceiveStatus {
    /// Nothing received yet
    #[default]
    Idle,
    /// The device took the data
    Accepted,
    /// The device cannot take data right now
    Busy,
    /// The device refused the data
    Rejected,
    /// No device with the addressed row, or the device takes no data
    Unsupported,
}

impl ReceiveStatus {
    pub fn to_register(self) -> u16 {
        match self {
            ReceiveStatus::Idle => 0,
            ReceiveStatus::Accepted => 1,
            ReceiveStatus::Busy => 2,
            ReceiveStatus::Rejected => 3,
            ReceiveStatus::Unsupported => 4,
        }
    }

    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0 => Some(ReceiveStatus::Idle),
            1 => Some(ReceiveStatus::Accepted),
            2 => Some(ReceiveStatus::Busy),
            3 => Some(ReceiveStatus::Rejected),
            4 => Some(ReceiveStatus::Unsupported),
            _ => None,
        }
    }
}

/// Base address of device block `index`
pub fn device_block(index: u16) -> u16 {
    DEVICE_BASE + index * DEVICE_STRIDE
}

/// Registers needed to carry a name of `name_len` bytes
pub fn name_regs(name_len: usize) -> u16 {
    name_len.div_ceil(2) as u16
}

/// Registers needed for `count` points of `point_size_bits` each
pub fn payload_regs(count: u16, point_size_bits: u16) -> u16 {
    let bits = count as u32 * point_size_bits as u32;
    bits.div_ceil(16).min(u16::MAX as u32) as u16
}

/// Split a u32 into high and low words
pub fn split_u32(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

/// Join high and low words into a u32
pub fn join_u32(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Pack bytes two per register, big-endian, zero padding the last register
pub fn bytes_to_regs(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

/// Unpack registers into `len` bytes, big-endian
pub fn regs_to_bytes(regs: &[u16], len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = regs.iter().flat_map(|r| r.to_be_bytes()).collect();
    bytes.truncate(len);
    bytes
}
