//! Typed sections of `buildhat.toml`.
//!
//! Every section has defaults, so an empty file (or no file) is valid.

use super::error::{ConfigError, ConfigResult};
use crate::link::LinkOptions;
use crate::port::PortConfiguration;
use crate::telemetry::Wiggle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything the driver reads from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device settings
    pub serial: SerialConfig,
    /// Protocol engine settings
    pub link: LinkConfig,
    /// Telemetry defaults
    pub telemetry: TelemetryConfig,
    /// Subscriber setup
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.device.trim().is_empty() {
            return Err(ConfigError::validation("serial.device", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::validation("serial.baud_rate", "must be positive"));
        }
        if let Err(e) = regex::Regex::new(&self.link.list_terminator) {
            return Err(ConfigError::validation("link.list_terminator", e.to_string()));
        }
        Ok(())
    }
}

/// Serial device section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path of the board's UART
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,
    /// Lock the device against other processes
    pub exclusive: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/serial0".to_string(),
            baud_rate: 115200,
            timeout_ms: 1000,
            exclusive: true,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Port settings for the serial backend.
    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.baud_rate,
            timeout: self.timeout(),
            exclusive: self.exclusive,
        }
    }
}

/// Protocol engine section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bound on waits for response lines; unset waits forever
    pub response_timeout_ms: Option<u64>,
    /// Regex matching the last line of the `list` response
    pub list_terminator: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: None,
            list_terminator: "^deltat=".to_string(),
        }
    }
}

impl LinkConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            response_timeout: self.response_timeout(),
        }
    }
}

/// Telemetry section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Hysteresis applied when a stream is created without one
    pub default_wiggle: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_wiggle: 0.0,
        }
    }
}

impl TelemetryConfig {
    pub fn wiggle(&self) -> Wiggle {
        Wiggle::Scalar(self.default_wiggle)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output layout
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// How log events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line, coloured.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
}
