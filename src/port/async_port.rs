//! Serial transport backed by tokio-serial.
//!
//! The port is not touched until [`Transport::open`] is called, which the
//! link does lazily on its first write.

use super::error::PortError;
use super::traits::{BoxedIo, PortConfiguration, Transport};
use async_trait::async_trait;
use tracing::debug;

/// A serial device opened through `tokio-serial`.
pub struct SerialTransport {
    /// System path of the device, e.g. `/dev/serial0`.
    path: String,
    /// Port configuration applied at open time.
    config: PortConfiguration,
    /// Set once the stream has been handed out.
    opened: bool,
}

impl SerialTransport {
    /// Describe a serial transport without opening it.
    ///
    /// # Example
    /// ```no_run
    /// use buildhat::port::{PortConfiguration, SerialTransport};
    ///
    /// let transport = SerialTransport::new("/dev/serial0", PortConfiguration::default());
    /// ```
    pub fn new(path: impl Into<String>, config: PortConfiguration) -> Self {
        Self {
            path: path.into(),
            config,
            opened: false,
        }
    }

    /// Get the port configuration.
    pub fn config(&self) -> &PortConfiguration {
        &self.config
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<BoxedIo, PortError> {
        if self.opened {
            return Err(PortError::AlreadyOpen);
        }

        let builder = tokio_serial::new(&self.path, self.config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.timeout);

        #[allow(unused_mut)]
        let mut stream = tokio_serial::SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => PortError::not_found(&self.path),
            tokio_serial::ErrorKind::InvalidInput => PortError::config(e.to_string()),
            _ => PortError::Serial(e),
        })?;
        #[cfg(unix)]
        stream.set_exclusive(self.config.exclusive)?;

        debug!(path = %self.path, baud = self.config.baud_rate, "serial port opened");
        self.opened = true;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("opened", &self.opened)
            .finish()
    }
}

/// List the serial devices present on this system.
pub fn list_ports() -> Result<Vec<String>, PortError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}
