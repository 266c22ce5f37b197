//! Radio error types

use thiserror::Error;

/// Errors reported by a radio implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommError {
    /// The radio did not respond in time
    #[error("Radio timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u32 },
    /// Hardware-specific error
    #[error("Hardware error {code}: {description}")]
    HardwareError { code: u32, description: String },
    /// Frame does not fit the radio buffer
    #[error("Frame of {size} bytes exceeds the {max} byte buffer")]
    FrameTooLarge { size: usize, max: usize },
    /// Configuration rejected by the radio
    #[error("Configuration error: invalid {parameter} = {value}")]
    ConfigurationError { parameter: String, value: String },
    /// Frame could not be built for transmission
    #[error("Invalid frame: {details}")]
    InvalidFrame { details: String },
}

/// Result type for radio operations
pub type CommResult<T> = Result<T, CommError>;
