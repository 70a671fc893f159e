//! rtubus - master/slave fieldbus stack over an RTU serial line
//!
//! A master discovers unaddressed slaves, onboards their devices into a
//! directory, broadcasts the time and relays device data to its host. Slaves
//! expose their devices through a fixed holding-register map.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `rtubus-core`: Error type, clock, register tables, register map, device directory
//! - `rtubus-transport`: Byte transports (serial, in-memory pair, noise injection)
//! - `rtubus-protocol`: CRC, frame assembly, PDU codec, protocol engine, master and slave links
//! - `rtubus-task`: Retryable task state machine and cooperative async tasks
//! - `rtubus-master`: Master workflows
//! - `rtubus-slave`: Slave node and device collaborators
//!
//! # Usage
//!
//! ```no_run
//! use rtubus::master::{Master, MasterConfig};
//! use rtubus::slave::{SlaveConfig, SlaveNode};
//! use rtubus::task::AsyncTask;
//! ```

// Re-export core types
pub use rtubus_core::{Clock, DeviceDirectory, DeviceRow, ManualClock, MemoryDirectory, MonotonicClock};
pub use rtubus_core::{LineSettings, RetryBudget, RtuError, RtuResult};

pub mod transport {
    pub use rtubus_transport::*;
}

pub mod protocol {
    pub use rtubus_protocol::*;
}

pub mod task {
    pub use rtubus_task::*;
}

// Re-export master API
pub mod master {
    pub use rtubus_master::*;
}

// Re-export slave API
pub mod slave {
    pub use rtubus_slave::*;
}
