//! Serial port transport implementation

use crate::transport::Transport;
use rtubus_core::{RtuError, RtuResult};
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;
use tokio_serial::{ClearBuffer, SerialPort};

/// Serial port transport settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    /// Drive RTS high while transmitting (RS-485 driver enable)
    pub rts_direction_control: bool,
}

impl SerialSettings {
    /// Create settings for 8N1 without flow control
    pub fn new(port_name: String) -> Self {
        Self {
            port_name,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            rts_direction_control: false,
        }
    }

    /// Create settings for an RS-485 adapter whose driver follows RTS
    pub fn rs485(port_name: String) -> Self {
        Self {
            rts_direction_control: true,
            ..Self::new(port_name)
        }
    }
}

/// Serial port transport
///
/// The port is opened in non-blocking fashion: bytes are only read when the
/// driver reports them pending.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    settings: SerialSettings,
    listening: bool,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("open", &self.port.is_some())
            .field("listening", &self.listening)
            .finish()
    }
}

impl SerialTransport {
    /// Create a closed serial transport
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            port: None,
            settings,
            listening: false,
        }
    }

    /// Create serial transport with port name only
    pub fn new_simple(port_name: String) -> Self {
        Self::new(SerialSettings::new(port_name))
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port_mut(&mut self) -> RtuResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(RtuError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn begin(&mut self, baud_rate: u32) -> RtuResult<()> {
        if self.port.is_some() {
            self.end();
        }

        let port = tokio_serial::new(&self.settings.port_name, baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| RtuError::Serial(format!("Failed to open serial port: {}", e)))?;

        log::info!(
            "Opened serial port {} at {} baud",
            self.settings.port_name,
            baud_rate
        );
        self.port = Some(port);
        self.listening = true;
        if self.settings.rts_direction_control {
            self.end_transmission()?;
        }
        Ok(())
    }

    fn end(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
            log::info!("Closed serial port {}", self.settings.port_name);
        }
        self.listening = false;
    }

    fn listen(&mut self) {
        if self.port.is_some() {
            self.listening = true;
        }
    }

    fn stop_listening(&mut self) {
        self.listening = false;
    }

    fn is_listening(&self) -> bool {
        self.listening
    }

    fn write(&mut self, byte: u8) -> RtuResult<usize> {
        let port = self.port_mut()?;
        Ok(port.write(&[byte])?)
    }

    fn read(&mut self) -> Option<u8> {
        if self.available() == 0 {
            return None;
        }
        let listening = self.listening;
        let port = self.port.as_mut()?;
        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(1) if listening => Some(buf[0]),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Serial read failed: {}", e);
                None
            }
        }
    }

    fn available(&self) -> usize {
        self.port
            .as_ref()
            .and_then(|port| port.bytes_to_read().ok())
            .unwrap_or(0) as usize
    }

    fn begin_transmission(&mut self) -> RtuResult<()> {
        if !self.settings.rts_direction_control {
            return Ok(());
        }
        let port = self.port_mut()?;
        port.write_request_to_send(true)
            .map_err(|e| RtuError::Serial(format!("Failed to raise RTS: {}", e)))
    }

    fn end_transmission(&mut self) -> RtuResult<()> {
        let rts = self.settings.rts_direction_control;
        let port = self.port_mut()?;
        port.flush()?;
        if rts {
            port.write_request_to_send(false)
                .map_err(|e| RtuError::Serial(format!("Failed to drop RTS: {}", e)))?;
        }
        Ok(())
    }

    fn drain_input(&mut self) -> usize {
        let pending = self.available();
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                log::debug!("Failed to clear serial input: {}", e);
            }
        }
        pending
    }
}
