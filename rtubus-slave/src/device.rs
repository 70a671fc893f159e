//! Device collaborator
//!
//! A device is something a slave hosts: a pulse meter, a data collector. The
//! slave never touches device state directly; it hands devices caller-owned
//! buffers and stores what they report in its registers.

use rtubus_core::ReceiveStatus;
use rtubus_core::regmap::DATA_PAYLOAD_REGS;

#[cfg(test)]
use mockall::automock;

/// Result of [`Device::read_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataPage {
    /// Points written to the buffer
    pub count: u16,
    /// Pages still to be read after this one
    pub pages_remaining: u16,
    /// Size of one point in bits
    pub point_size_bits: u16,
}

impl DataPage {
    pub const EMPTY: Self = Self {
        count: 0,
        pages_remaining: 0,
        point_size_bits: 0,
    };

    /// Bytes occupied by the points of this page
    pub fn byte_len(&self) -> usize {
        (self.count as usize * self.point_size_bits as usize).div_ceil(8)
    }
}

/// A device hosted by a slave
#[cfg_attr(test, automock)]
pub trait Device {
    /// Device type code
    fn device_type(&self) -> u16;

    /// Number of data registers advertised in the device block
    fn data_registers(&self) -> u16 {
        DATA_PAYLOAD_REGS
    }

    /// Write up to `num_points` samples taken since `start_time` into `buffer`
    ///
    /// `page` selects which slice of the pending samples to return when they
    /// do not fit into one buffer.
    fn read_data(&mut self, start_time: u32, num_points: u16, page: u16, buffer: &mut [u8]) -> DataPage;

    /// Set the device clock, in seconds
    fn set_clock(&mut self, clock: u32);

    /// Announce `len` bytes of incoming data
    fn prepare_receive_data(&mut self, len: usize) -> ReceiveStatus;

    /// Deliver data announced by [`Device::prepare_receive_data`]
    fn receive_device_data(&mut self, data: &[u8]) -> ReceiveStatus;
}
