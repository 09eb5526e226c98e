use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for analysis operations.
///
/// An analysis that completes without finding anything is not an error:
/// those outcomes are reported as empty rankings or `None`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A video or image could not be opened or read.
    #[error("i/o failure on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The requested start time lies at or beyond the end of the recording.
    #[error("start time {requested:.2}s is beyond video duration {duration:.2}s")]
    OutOfRange { requested: f64, duration: f64 },

    /// An encoder or output file could not be opened or written.
    #[error("write failure on {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// A clip window that is empty after clamping to the recording.
    #[error("invalid clip window [{start:.2}s, {end:.2}s]")]
    InvalidWindow { start: f64, end: f64 },

    /// Rejected configuration, reported before any I/O happens.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The detector backend failed on a frame.
    #[error("detector '{backend}' failed: {message}")]
    Detector { backend: String, message: String },
}

impl AnalysisError {
    pub fn io(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Write {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
