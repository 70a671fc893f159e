//! Link statistics collection

/// Counters kept by a master or slave link
///
/// Statistics are updated by the link as frames move; callers can inspect or
/// clear them at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatistics {
    /// Total number of frames sent
    pub frames_sent: u64,
    /// Total number of complete frames received
    pub frames_received: u64,
    /// Frames discarded because the CRC did not match
    pub crc_errors: u64,
    /// Frames discarded because they were addressed elsewhere
    pub foreign_frames: u64,
    /// Frames discarded because they exceeded the size limit
    pub overflows: u64,
    /// Request frames sent again by a retry
    pub retransmissions: u64,
}

impl LinkStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_frames_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn increment_frames_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn increment_crc_errors(&mut self) {
        self.crc_errors += 1;
    }

    pub fn increment_foreign_frames(&mut self) {
        self.foreign_frames += 1;
    }

    pub fn increment_overflows(&mut self) {
        self.overflows += 1;
    }

    pub fn increment_retransmissions(&mut self) {
        self.retransmissions += 1;
    }

    /// Percentage of received frames rejected for CRC errors or overflow
    ///
    /// Returns 0.0 if no frames have been received.
    pub fn error_rate(&self) -> f64 {
        let errors = self.crc_errors + self.overflows;
        if self.frames_received == 0 {
            0.0
        } else {
            (errors as f64 / self.frames_received as f64) * 100.0
        }
    }
}
