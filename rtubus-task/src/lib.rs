//! Task machinery for rtubus
//!
//! Two cooperative building blocks, neither of which ever blocks the caller:
//!
//! - [`RetryableTask`] drives a begin/check/retry exchange to a terminal
//!   [`TaskStatus`] under a [`RetryBudget`](rtubus_core::RetryBudget).
//! - [`AsyncTask`] advances a future by one poll per [`AsyncTask::step`], so
//!   long workflows can be interleaved from a plain outer loop.

pub mod async_task;
pub mod retry;
pub mod status;

pub use async_task::{AsyncTask, TaskQueue, YieldNow, yield_now};
pub use retry::{Retryable, RetryableTask};
pub use status::TaskStatus;
