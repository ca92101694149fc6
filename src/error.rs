//! Crate error taxonomy.
//!
//! Transport failures, grammar failures, port-state failures and errors
//! reported by the board each get their own type; [`HatError`] wraps them so
//! that `?` works across the engine.

use crate::config::ConfigError;
use crate::device::{Capability, DeviceClass};
use crate::port::PortError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for board operations.
pub type HatResult<T> = Result<T, HatError>;

/// The production of the board's text grammar that failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarRule {
    /// `P<n>:` header introducing a port.
    PortHeader { port: usize },
    /// `P<n>: connected ...` after a header that is not `no device`.
    Connected { port: usize },
    /// `type <hex>`.
    TypeLine,
    /// `nmodes` too large to describe a mode table.
    ModeCount,
    /// `M<n> <name> SI=<unit>`.
    ModeHeader { index: usize },
    /// The `<n>` in a mode header did not follow the running index.
    ModeNumber { expected: usize, found: usize },
    /// `format count=.. type=.. chars=.. dp=..`.
    FormatLine { index: usize },
    /// Repeated `<unit>: <hexmin> <hexmax>` triples.
    LimitsLine { index: usize },
    /// `<name> PID: <v1> <v2> <v3> <v4>`.
    PidLine,
    /// `P<n>M<m>: <values...>` sample line.
    ModeResponse,
}

impl fmt::Display for GrammarRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortHeader { port } => write!(f, "bad header for P{port}"),
            Self::Connected { port } => write!(f, "expected \"P{port}: connected...\""),
            Self::TypeLine => write!(f, "bad type line"),
            Self::ModeCount => write!(f, "mode count out of range"),
            Self::ModeHeader { index } => write!(f, "bad header for mode {index}"),
            Self::ModeNumber { expected, found } => {
                write!(f, "bad mode number: {found} != {expected}")
            }
            Self::FormatLine { index } => write!(f, "bad format line for mode {index}"),
            Self::LimitsLine { index } => write!(f, "bad limits line for mode {index}"),
            Self::PidLine => write!(f, "bad PID line"),
            Self::ModeResponse => write!(f, "bad mode response"),
        }
    }
}

/// Parsing failed against the expected grammar.
///
/// `line` carries the offending raw line; it is `None` when the input ran
/// out before the rule could be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub rule: GrammarRule,
    pub line: Option<String>,
}

impl GrammarError {
    /// The rule failed on `line`.
    pub fn at(rule: GrammarRule, line: impl Into<String>) -> Self {
        Self {
            rule,
            line: Some(line.into()),
        }
    }

    /// The input ended while `rule` still needed a line.
    pub fn truncated(rule: GrammarRule) -> Self {
        Self { rule, line: None }
    }

    pub fn is_truncated(&self) -> bool {
        self.line.is_none()
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.line {
            Some(line) => write!(f, "{}, got \"{}\"", self.rule, line),
            None => write!(f, "device list truncated ({})", self.rule),
        }
    }
}

impl std::error::Error for GrammarError {}

/// An operation addressed a port that cannot serve it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortStateError {
    #[error("Port index {0} out of range (0..4)")]
    InvalidPort(usize),

    #[error("No device {0}")]
    NoDevice(usize),

    #[error("Port {port} is a {actual} not a {expected}")]
    TypeMismatch {
        port: usize,
        actual: DeviceClass,
        expected: Capability,
    },

    #[error("Device on port {0} has been disconnected")]
    Detached(usize),
}

/// Unified error type for the driver.
#[derive(Debug, Error)]
pub enum HatError {
    #[error("Transport error: {0}")]
    Transport(#[from] PortError),

    #[error("Protocol error: {0}")]
    Grammar(#[from] GrammarError),

    #[error("Port error: {0}")]
    PortState(#[from] PortStateError),

    #[error("Error from BuildHAT: {line}")]
    Board { line: String },

    #[error("Port {port} has no mode {mode:?}")]
    UnknownMode { port: usize, mode: String },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Link to the board is closed")]
    LinkClosed,

    #[error("Transaction was abandoned before completing")]
    TransactionAborted,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<std::io::Error> for HatError {
    fn from(err: std::io::Error) -> Self {
        HatError::Transport(PortError::Io(err))
    }
}
