//! Core types and utilities for the rtubus fieldbus stack
//!
//! This crate provides the error type, the clock abstraction, holding-register
//! tables, the register map shared by master and slave, the device directory
//! collaborator and the configuration types used throughout the workspace.

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod registers;
pub mod regmap;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{LineSettings, RetryBudget};
pub use directory::{DeviceDirectory, DeviceRow, DirectoryUpdate, MemoryDirectory};
pub use error::{RtuError, RtuResult};
pub use registers::{DenseRegisters, RegisterTable, SparseRegisters};
pub use regmap::ReceiveStatus;
