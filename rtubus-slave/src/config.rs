//! Slave configuration

use rtubus_core::regmap::{MAX_NAME_LEN, PROTOCOL_VERSION};
use rtubus_core::{LineSettings, RtuError, RtuResult};
use serde::{Deserialize, Serialize};

/// Slave node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    /// Serial line parameters
    pub line: LineSettings,
    /// Register layout version advertised to the master
    pub protocol_version: u16,
    /// Length of device names in bytes
    pub name_length: usize,
}

impl SlaveConfig {
    pub fn validate(&self) -> RtuResult<()> {
        if self.name_length == 0 || self.name_length > MAX_NAME_LEN {
            return Err(RtuError::InvalidConfig(format!(
                "Device name length must be 1..={}, got {}",
                MAX_NAME_LEN,
                self.name_length
            )));
        }
        if self.line.baud_rate == 0 {
            return Err(RtuError::InvalidConfig("Baud rate must not be zero".to_string()));
        }
        Ok(())
    }
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            line: LineSettings::default(),
            protocol_version: PROTOCOL_VERSION,
            name_length: 8,
        }
    }
}
