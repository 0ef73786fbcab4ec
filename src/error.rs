//! Error types for relu-grad operations.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relu-grad operations.
///
/// Shape errors are reported by validation before any buffer is written.
/// The numeric computation itself never fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Batch size rejected by the shape validator.
    #[error("invalid batch size: {0}")]
    InvalidBatchSize(usize),

    /// Channel count rejected by the shape validator.
    #[error("invalid channels: {0}")]
    InvalidChannels(usize),

    /// `batch_size * channels` does not fit in `usize`.
    #[error("tensor size overflow: {batch_size} x {channels}")]
    SizeOverflow {
        /// Batch size.
        batch_size: usize,
        /// Channel count.
        channels: usize,
    },

    /// A buffer is shorter than `batch_size * channels`.
    #[error("buffer '{buffer}' holds {actual} elements, {required} required")]
    BufferTooSmall {
        /// Name of the short buffer.
        buffer: &'static str,
        /// Required element count.
        required: usize,
        /// Actual element count.
        actual: usize,
    },

    /// Configuration parsing error with line number.
    #[error("configuration error at line {line}: {message}")]
    ConfigParse {
        /// Line number where the error occurred (1-indexed, 0 if unknown).
        line: usize,
        /// Error message describing the issue.
        message: String,
    },

    /// Configuration file not found or unreadable.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key with invalid value.
        key: String,
        /// Error message describing why the value is invalid.
        message: String,
    },

    /// A kernel backend was requested that this CPU cannot run.
    #[error("kernel backend '{0}' is not available on this system")]
    BackendUnavailable(&'static str),

    /// Thread pool construction failed.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}
