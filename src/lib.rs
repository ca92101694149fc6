//! Async host-side driver for Build HAT style motor/sensor controller boards.
//!
//! The board speaks a line-oriented ASCII protocol over a serial link and
//! hosts up to four devices. This crate turns that protocol into typed,
//! ordered async operations.
//!
//! # Modules
//!
//! - `port`: byte-stream transports (serial backend and in-memory mock)
//! - `link`: line framing, watchers, the transaction queue and [`SerialLink`]
//! - `devicelist`: parser for the board's device inventory
//! - `device`: per-port device handles and command types
//! - `telemetry`: mode sampling with hysteresis
//! - `hat`: board initialisation and the port registry
//! - `config`: configuration management with TOML support
//! - `logging`: tracing subscriber setup
//! - `error`: unified error handling
//!
//! # Example
//!
//! ```no_run
//! use buildhat::{BuildHat, Capability, Config, Setpoint};
//!
//! # async fn run() -> buildhat::HatResult<()> {
//! let hat = BuildHat::open(&Config::default())?;
//! hat.ready().await?;
//!
//! let motor = hat.port(0, Capability::Motor)?;
//! motor.set(Setpoint::Level(0.5)).await?;
//!
//! let speed = motor.telemetry(2.0);
//! speed.start("speed")?;
//! let mut updates = speed.updates();
//! while let Some(sample) = updates.recv().await {
//!     println!("speed: {:?}", sample);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod devicelist;
pub mod error;
pub mod hat;
pub mod link;
pub mod logging;
pub mod port;
pub mod predicate;
pub mod telemetry;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use device::{
    Capability, CombiEntry, Device, DeviceClass, DeviceType, Format, ModeRef, ModeSelector,
    PidConfig, Setpoint, Transition, Waveform,
};
pub use devicelist::{
    parse_device, parse_device_list, parse_mode_response, DeviceInfo, DeviceList,
    DeviceListParser, Limit, Mode, ModeFormat, PORT_COUNT,
};
pub use error::{GrammarError, GrammarRule, HatError, HatResult, PortStateError};
pub use hat::{BuildHat, Inventory};
pub use link::{CommandLine, Direction, LinkOptions, LogMessage, SerialLink, WatcherId};
pub use port::{MockBoard, MockTransport, PortConfiguration, PortError, SerialTransport, Transport};
pub use telemetry::{TelemetryStream, Wiggle};
