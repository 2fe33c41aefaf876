//! Error types for pcmflash.

use std::io;
use thiserror::Error;

/// Result type for pcmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pcmflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (device transport, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No response arrived within the allotted window.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The PCM actively rejected the request (e.g. write-block NAK).
    #[error("Refused: {0}")]
    Refused(String),

    /// A frame decoded cleanly but was semantically wrong.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Transport failure, malformed frame, or protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A read returned fewer bytes than expected.
    #[error("Truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Number of bytes that should have been read.
        expected: usize,
        /// Number of bytes actually read.
        actual: usize,
    },

    /// Kernel binary file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Kernel binary file exists but is not readable.
    #[error("Access denied: {0}")]
    Unauthorized(String),

    /// Kernel binary path exceeds the platform limit.
    #[error("Path too long: {0}")]
    PathTooLong(String),

    /// The operation was cancelled by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,

    /// No key transform is registered for this algorithm id.
    #[error("Unknown key algorithm: {0}")]
    UnknownAlgorithm(u16),

    /// Operation not implemented for this target.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Math expression failed to compile or evaluate.
    #[error("Expression error: {0}")]
    Expression(String),
}
