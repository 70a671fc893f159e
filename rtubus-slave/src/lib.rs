//! Slave node for rtubus
//!
//! A [`SlaveNode`] exposes its devices through the shared register map
//! ([`rtubus_core::regmap`]), answers requests over a
//! [`SlaveLink`](rtubus_protocol::SlaveLink) and reacts to the writes the
//! master uses to address it, set its clock and move device data.

pub mod config;
pub mod device;
pub mod node;

pub use config::SlaveConfig;
pub use device::{DataPage, Device};
pub use node::SlaveNode;
pub use rtubus_core::{ReceiveStatus, RtuError, RtuResult};
