use thiserror::Error;

/// Main error type for rtubus host-side faults
///
/// Protocol exceptions, integrity failures and exhausted retry budgets are
/// modelled as values by the layers that produce them and never appear here.
#[derive(Error, Debug)]
pub enum RtuError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Directory error: {0}")]
    Directory(String),
}

/// Result type alias for rtubus operations
pub type RtuResult<T> = Result<T, RtuError>;
