//! # Error Types
//!
//! Custom error types for the GNSS locator using `thiserror`.
//!
//! Engine outcomes such as "modem off" or "attempt already running" are
//! reported as [`crate::AcquireOutcome`] values, never as errors; the variants
//! here cover genuine failures of the transport, configuration or payload
//! serialization layers.

use thiserror::Error;

/// Main error type for the GNSS locator
#[derive(Debug, Error)]
pub enum LocateError {
    /// Modem transport errors
    #[error("modem transport error: {0}")]
    Transport(String),

    /// A modem reply did not arrive within the allotted wait
    #[error("modem reply timed out after {0} ms")]
    ReplyTimeout(u64),

    /// Configuration file errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Publish payload exceeded the maximum event size
    #[error("publish payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Publish payload serialization errors
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the GNSS locator
pub type Result<T> = std::result::Result<T, LocateError>;
