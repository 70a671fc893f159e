//! Transport layer module for rtubus
//!
//! This crate turns protocol frames into byte-stream I/O over a half-duplex
//! line. It provides the [`Transport`] trait, a serial port implementation,
//! an in-memory line pair and a noise-injecting wrapper.

pub mod memory;
pub mod noisy;
pub mod serial;
pub mod transport;

pub use memory::MemoryLine;
pub use noisy::{NoiseProfile, NoisyTransport};
pub use rtubus_core::{RtuError, RtuResult};
pub use serial::{SerialSettings, SerialTransport};
pub use transport::Transport;
