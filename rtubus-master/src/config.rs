//! Master configuration

use rtubus_core::config::millis;
use rtubus_core::{LineSettings, RetryBudget, RtuError, RtuResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Schedule for relaying data of a group of device types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeScale {
    /// Seconds between two transfers
    pub interval_secs: u32,
    /// Device types on this schedule; empty means every type
    pub device_types: Vec<u16>,
}

impl TimeScale {
    pub fn new(interval_secs: u32, device_types: Vec<u16>) -> Self {
        Self {
            interval_secs,
            device_types,
        }
    }

    /// Whether devices of `device_type` follow this schedule
    pub fn covers(&self, device_type: u16) -> bool {
        self.device_types.is_empty() || self.device_types.contains(&device_type)
    }

    /// Whether a transfer is due at `now`, given the last one
    pub fn is_due(&self, last: Option<u32>, now: u32) -> bool {
        last.is_none_or(|last| now.saturating_sub(last) >= self.interval_secs)
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self::new(60, Vec::new())
    }
}

/// Master configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Serial line parameters
    pub line: LineSettings,
    /// Budget for ordinary register requests
    pub request_budget: RetryBudget,
    /// Budget for asking the new-slave address during discovery
    pub discovery_budget: RetryBudget,
    /// Data transfer schedules
    pub time_scales: Vec<TimeScale>,
    /// Time between clock broadcasts; zero disables them
    #[serde(with = "millis")]
    pub broadcast_interval: Duration,
}

impl MasterConfig {
    pub fn validate(&self) -> RtuResult<()> {
        if self.line.baud_rate == 0 {
            return Err(RtuError::InvalidConfig("Baud rate must not be zero".to_string()));
        }
        if self.time_scales.iter().any(|scale| scale.interval_secs == 0) {
            return Err(RtuError::InvalidConfig(
                "Time scale interval must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            line: LineSettings::default(),
            request_budget: RetryBudget::default(),
            // An absent slave is the normal case; give up quickly
            discovery_budget: RetryBudget::new(2, Duration::from_millis(50))
                .with_max_time(Duration::from_millis(200))
                .with_min_attempt_time(Duration::from_millis(20)),
            time_scales: vec![TimeScale::default()],
            broadcast_interval: Duration::from_secs(60),
        }
    }
}
