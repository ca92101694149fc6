//! Transport abstraction for the board connection.
//!
//! Provides the [`Transport`] trait plus a real serial backend and an
//! in-memory mock, enabling dependency injection and testing.

pub mod async_port;
pub mod error;
pub mod mock;
pub mod traits;

pub use async_port::{list_ports, SerialTransport};
pub use error::PortError;
pub use mock::{MockBoard, MockTransport};
pub use traits::*;
