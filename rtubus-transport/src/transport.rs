//! Byte-level transport trait

use rtubus_core::{RtuError, RtuResult};

/// Half-duplex byte stream to the remote station(s)
///
/// Every method is non-blocking. Frame boundaries are not marked on the wire;
/// the protocol layer recognises them by line silence.
pub trait Transport {
    /// Open the line at the given speed
    fn begin(&mut self, baud_rate: u32) -> RtuResult<()>;

    /// Close the line
    fn end(&mut self);

    /// Start accepting incoming bytes
    fn listen(&mut self);

    /// Stop accepting incoming bytes; bytes arriving meanwhile are lost
    fn stop_listening(&mut self);

    /// Whether incoming bytes are accepted
    fn is_listening(&self) -> bool;

    /// Write one byte
    ///
    /// # Returns
    /// Number of bytes written, 0 if the byte could not be queued
    fn write(&mut self, byte: u8) -> RtuResult<usize>;

    /// Read one byte, `None` when nothing is pending
    fn read(&mut self) -> Option<u8>;

    /// Number of bytes ready to be read
    fn available(&self) -> usize;

    /// Take the line for transmission (e.g. enable the RS-485 driver)
    fn begin_transmission(&mut self) -> RtuResult<()> {
        Ok(())
    }

    /// Release the line after transmission
    fn end_transmission(&mut self) -> RtuResult<()> {
        Ok(())
    }

    /// Write all bytes of a frame
    fn write_all(&mut self, bytes: &[u8]) -> RtuResult<()> {
        for &byte in bytes {
            if self.write(byte)? == 0 {
                return Err(RtuError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                )));
            }
        }
        Ok(())
    }

    /// Discard every pending input byte
    fn drain_input(&mut self) -> usize {
        let mut discarded = 0;
        while self.read().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn begin(&mut self, baud_rate: u32) -> RtuResult<()> {
        (**self).begin(baud_rate)
    }

    fn end(&mut self) {
        (**self).end()
    }

    fn listen(&mut self) {
        (**self).listen()
    }

    fn stop_listening(&mut self) {
        (**self).stop_listening()
    }

    fn is_listening(&self) -> bool {
        (**self).is_listening()
    }

    fn write(&mut self, byte: u8) -> RtuResult<usize> {
        (**self).write(byte)
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }

    fn available(&self) -> usize {
        (**self).available()
    }

    fn begin_transmission(&mut self) -> RtuResult<()> {
        (**self).begin_transmission()
    }

    fn end_transmission(&mut self) -> RtuResult<()> {
        (**self).end_transmission()
    }
}
