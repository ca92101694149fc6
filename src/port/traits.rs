//! Core traits for the byte-stream transport.
//!
//! The protocol engine never talks to a serial device directly. It asks a
//! [`Transport`] for a duplex stream the first time it needs one, which lets
//! the real `tokio-serial` backend and the in-memory mock be swapped freely.

use super::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Baud rate the controller firmware speaks.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Line settings for the board's UART.
///
/// Character framing is always 8N1 without flow control; only the rate and
/// driver behaviour vary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    pub baud_rate: u32,

    /// Read/write timeout handed to the driver.
    pub timeout: Duration,

    /// Refuse to share the device with other processes (Unix only).
    pub exclusive: bool,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(1),
            exclusive: true,
        }
    }
}

/// A duplex byte stream handed out by a [`Transport`].
pub trait TransportIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TransportIo for T {}

/// Boxed stream type the link works with.
pub type BoxedIo = Box<dyn TransportIo>;

/// Something that can produce the byte stream to the board.
///
/// `open` is called at most once per link, lazily, on the first write.
#[async_trait]
pub trait Transport: Send + std::fmt::Debug {
    /// Open the underlying device and return its stream.
    async fn open(&mut self) -> Result<BoxedIo, PortError>;

    /// Device path or label, used in log output.
    fn name(&self) -> &str;
}
