//! Transport-level error types.
//!
//! Kept apart from the protocol errors so that a failure to open or write
//! the byte stream can be told apart from a board that answered with
//! something unexpected.

use thiserror::Error;

/// Errors raised by a [`Transport`](super::Transport) or the stream it opens.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No serial device at {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver rejected the requested line settings.
    #[error("Unsupported port settings: {0}")]
    Config(String),

    /// A transport hands out its stream once.
    #[error("Transport was already opened")]
    AlreadyOpen,

    /// Write attempted with no stream, e.g. after the link closed.
    #[error("Transport is not open")]
    NotOpen,

    #[error("Serial driver error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
