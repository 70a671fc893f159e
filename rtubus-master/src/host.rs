//! Host collaborator
//!
//! The host is whatever sits above the master: a gateway uplink, a logger, a
//! test harness. It supplies the wall-clock time, takes device data and hears
//! about malfunctions.

use crate::request::RequestResult;

#[cfg(test)]
use mockall::automock;

/// Workflow that ran into a malfunction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MalfunctionKind {
    /// Discovery at the new-slave address failed
    Discovery,
    /// Onboarding the slave at the new-slave address failed
    Onboarding,
    /// The clock broadcast could not be sent
    TimeBroadcast,
    /// Reading data from a device failed
    DataTransfer { slave_id: u8, device_number: u16 },
    /// Sending data to a device failed
    DataDelivery { slave_id: u8, device_number: u16 },
}

/// Services the master needs from its host
#[cfg_attr(test, automock)]
pub trait HostLink {
    /// Current time in seconds
    fn current_time(&self) -> u32;

    /// A workflow failed in a way that needs attention
    fn report_malfunction(&mut self, kind: MalfunctionKind, cause: RequestResult);

    /// One page of samples read from the device called `name`
    fn send_device_data(&mut self, name: &[u8], start_time: u32, page: u16, point_size_bits: u16, payload: &[u8]);
}
