//! Master workflows for rtubus
//!
//! [`Master`] sequences the operational workflows of a bus master: finding
//! unaddressed slaves, onboarding them into the device directory, broadcasting
//! the time and relaying device data to the host. Every workflow is an `async`
//! function built from retryable register requests; drive it with an
//! [`rtubus_task::AsyncTask`] from the application's main loop.

pub mod config;
pub mod host;
pub mod master;
pub mod request;

pub use config::{MasterConfig, TimeScale};
pub use host::{HostLink, MalfunctionKind};
pub use master::{CycleReport, Master, SlaveOutcome, TransferReport};
pub use request::{RegisterRequest, RequestResult};
pub use rtubus_core::{RtuError, RtuResult};
