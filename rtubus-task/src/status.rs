//! Retryable task status

use std::fmt;

/// Status of a retryable task
///
/// Variants are ordered; everything from [`TaskStatus::Complete`] on is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskStatus {
    /// `begin` has not been called yet
    #[default]
    NotStarted,
    /// Waiting for the current attempt to finish
    InProgress,
    /// The current attempt failed and may be retried
    Failure,
    /// The current attempt ran out of time and may be retried
    AttemptTimeOut,
    /// Finished successfully
    Complete,
    /// The total time budget ran out
    TimeOut,
    /// Every allowed attempt was used
    FullyAttempted,
    /// Failed in a way retrying cannot fix
    Fatal,
}

impl TaskStatus {
    /// Whether no further steps will run
    pub fn is_terminal(self) -> bool {
        self >= TaskStatus::Complete
    }

    /// Whether the current attempt ended and a retry is possible
    pub fn is_retryable(self) -> bool {
        matches!(self, TaskStatus::Failure | TaskStatus::AttemptTimeOut)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::NotStarted => "not started",
            TaskStatus::InProgress => "in progress",
            TaskStatus::Failure => "failure",
            TaskStatus::AttemptTimeOut => "attempt timed out",
            TaskStatus::Complete => "complete",
            TaskStatus::TimeOut => "timed out",
            TaskStatus::FullyAttempted => "fully attempted",
            TaskStatus::Fatal => "fatal",
        };
        f.write_str(name)
    }
}
