//! Error types for rd-audio
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//!
//! Steady-state playback never produces these: the real-time `read` paths report
//! trouble only through state flags (`is_valid`, `is_playing`, `has_data_left`).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rd-audio
#[derive(Error, Debug)]
pub enum Error {
    /// File missing, unreadable, or rejected by the demuxer
    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// Extension or codec the engine has no decoder for
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sample rate conversion errors
    #[error("Resample error: {0}")]
    Resample(String),

    /// Slice end lies before slice start
    #[error("Invalid slice: end ({end}s) < start ({start}s)")]
    InvalidSlice { start: f64, end: f64 },

    /// Slice requested from a sample that never finished loading
    #[error("No buffer available")]
    NoBuffer,

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Convenience Result type using rd-audio Error
pub type Result<T> = std::result::Result<T, Error>;
