//! Configuration types shared across the stack
//!
//! All configuration is plain data passed through constructors. Durations are
//! serialised as integer milliseconds (or microseconds where noted).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum RTU application data unit: address + PDU (253) + CRC
pub const MAX_ADU_LEN: usize = 256;

/// Budgets enforced by the retryable-task state machine
///
/// A value of zero disables the corresponding bound: unlimited tries, unlimited
/// total time, unlimited time per attempt, no minimum spacing between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    /// Maximum number of attempts (`begin` + `retry` invocations)
    pub max_tries: u32,
    /// Maximum time since the first attempt
    #[serde(with = "millis")]
    pub max_time: Duration,
    /// Maximum time a single attempt may stay in progress
    #[serde(with = "millis")]
    pub max_attempt_time: Duration,
    /// Minimum time between the start of two attempts
    #[serde(with = "millis")]
    pub min_attempt_time: Duration,
}

impl RetryBudget {
    /// Budget with every bound disabled
    pub const UNBOUNDED: Self = Self {
        max_tries: 0,
        max_time: Duration::ZERO,
        max_attempt_time: Duration::ZERO,
        min_attempt_time: Duration::ZERO,
    };

    /// Create a budget limited by attempt count and per-attempt time
    pub fn new(max_tries: u32, max_attempt_time: Duration) -> Self {
        Self {
            max_tries,
            max_attempt_time,
            ..Self::UNBOUNDED
        }
    }

    /// Set the total time bound
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    /// Set the minimum spacing between attempts
    pub fn with_min_attempt_time(mut self, min_attempt_time: Duration) -> Self {
        self.min_attempt_time = min_attempt_time;
        self
    }
}

impl Default for RetryBudget {
    /// Three attempts of 100 ms each, 20 ms apart, at most one second overall
    fn default() -> Self {
        Self {
            max_tries: 3,
            max_time: Duration::from_secs(1),
            max_attempt_time: Duration::from_millis(100),
            min_attempt_time: Duration::from_millis(20),
        }
    }
}

/// Serial line parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Line speed in bits per second
    pub baud_rate: u32,
    /// Silence that terminates a frame
    #[serde(with = "micros")]
    pub inter_frame_timeout: Duration,
    /// Delay between the end of a received frame and the start of a reply
    #[serde(with = "micros")]
    pub turnaround_delay: Duration,
    /// Largest frame accepted before the receiver discards input
    pub max_frame_len: usize,
}

impl LineSettings {
    /// Settings for a baud rate with the standard 3.5 character silence
    pub fn for_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            inter_frame_timeout: Self::silence_for_baud(baud_rate),
            turnaround_delay: Duration::ZERO,
            max_frame_len: MAX_ADU_LEN,
        }
    }

    /// 3.5 character times of 11 bits, fixed at 1750 µs above 19200 baud
    pub fn silence_for_baud(baud_rate: u32) -> Duration {
        if baud_rate == 0 || baud_rate > 19_200 {
            Duration::from_micros(1_750)
        } else {
            Duration::from_micros(38_500_000 / baud_rate as u64)
        }
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::for_baud(9_600)
    }
}

/// Serde adapter for durations stored as integer milliseconds
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde adapter for durations stored as integer microseconds
pub mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}
