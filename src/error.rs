//! Error types for dripgate.

use thiserror::Error;

/// Main error type for dripgate operations.
///
/// Runtime limiter operations never fail; errors surface only from
/// construction, reconfiguration, and configuration loading.
#[derive(Error, Debug)]
pub enum DripgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bucket capacity must be at least one
    #[error("Invalid bucket capacity: {0}")]
    Capacity(u64),

    /// Drain rate must be finite and positive
    #[error("Invalid drain rate: {0}")]
    Rate(f64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dripgate operations.
pub type Result<T> = std::result::Result<T, DripgateError>;
