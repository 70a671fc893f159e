//! Protocol engine for rtubus
//!
//! This crate encodes and decodes RTU frames for the holding-register subset
//! of the protocol (functions 0x03, 0x06 and 0x10 plus exception replies),
//! applies requests to a register table on the slave side, interprets
//! responses on the master side, and moves whole frames over a
//! [`rtubus_transport::Transport`].

pub mod crc;
pub mod engine;
pub mod frame;
pub mod link;
pub mod pdu;
pub mod receiver;
pub mod response;
pub mod statistics;

pub use crc::{Crc16, calc_crc, rev_word};
pub use engine::{ProtocolEngine, ReplyMode};
pub use frame::FrameBuffer;
pub use link::{HandledRequest, MasterLink, SlaveLink};
pub use pdu::{Adu, ExceptionCode, FunctionCode};
pub use receiver::FrameReceiver;
pub use response::ResponseFrame;
pub use rtubus_core::{RtuError, RtuResult};
pub use statistics::LinkStatistics;
