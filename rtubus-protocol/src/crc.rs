//! CRC-16 calculation for RTU frames
//!
//! CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF, no final
//! XOR. The checksum is appended to the frame low byte first.

use once_cell::sync::Lazy;

/// CRC calculation constants
const INITIAL_CRC: u16 = 0xFFFF;
const KEY: u16 = 0xA001; // Bit-reversed 0x8005

/// Precomputed CRC table
static CRC_TABLE: Lazy<[u16; 256]> = Lazy::new(|| {
    let mut table = [0u16; 256];
    for b in 0..=0xFF {
        let mut v = b as u16;
        for _ in 0..8 {
            if (v & 1) == 1 {
                v = (v >> 1) ^ KEY;
            } else {
                v >>= 1;
            }
        }
        table[b as usize] = v;
    }
    table
});

/// Running CRC-16 calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    crc_value: u16,
}

impl Crc16 {
    /// Create a new calculator at the initial value
    pub fn new() -> Self {
        Self {
            crc_value: INITIAL_CRC,
        }
    }

    /// Reset the CRC value to initial state
    pub fn reset(&mut self) {
        self.crc_value = INITIAL_CRC;
    }

    /// Update the CRC value with a single byte
    pub fn update(&mut self, data: u8) {
        self.crc_value =
            (self.crc_value >> 8) ^ CRC_TABLE[((self.crc_value ^ data as u16) & 0xFF) as usize];
    }

    /// Update the CRC value with multiple bytes
    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Get the current CRC value
    pub fn value(&self) -> u16 {
        self.crc_value
    }

    /// Get the CRC value in wire order (low byte first)
    pub fn value_bytes(&self) -> [u8; 2] {
        self.crc_value.to_le_bytes()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC over a seed byte (the slave address) followed by `buffer`
pub fn calc_crc(seed_byte: u8, buffer: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(seed_byte);
    crc.update_bytes(buffer);
    crc.value()
}

/// Swap the two bytes of a word
pub fn rev_word(word: u16) -> u16 {
    word.rotate_left(8)
}

/// Whether the last two bytes of `frame` are the CRC of the preceding bytes
pub fn frame_crc_ok(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    calc_crc(body[0], &body[1..]) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        let mut crc = Crc16::new();
        crc.update_bytes(b"123456789");
        assert_eq!(crc.value(), 0x4B37);
    }

    #[test]
    fn test_known_request_frame() {
        // 01 03 00 00 00 01 -> 84 0A on the wire
        let crc = calc_crc(0x01, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(crc.to_le_bytes(), [0x84, 0x0A]);
        assert_eq!(rev_word(crc), 0x840A);
    }

    #[test]
    fn test_crc_reset() {
        let mut crc = Crc16::new();
        crc.update(0x01);
        crc.reset();
        assert_eq!(crc.value(), INITIAL_CRC);
    }

    #[test]
    fn test_frame_crc_ok() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        assert!(frame_crc_ok(&frame));
        let mut corrupted = frame;
        corrupted[3] ^= 0x10;
        assert!(!frame_crc_ok(&corrupted));
        assert!(!frame_crc_ok(&frame[..2]));
    }
}
