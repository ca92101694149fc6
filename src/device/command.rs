//! Argument types for per-port device commands.
//!
//! Each type renders to the exact text the board expects, so the device
//! handle only has to prefix `port <n>` and pick a link operation.

use std::fmt;

/// Periodic waveform shapes for `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Square,
    Sine,
    Triangle,
}

/// Single-shot transitions for `set`; the board reports `P<n>: <shape> done`
/// when they finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pulse,
    Ramp,
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Waveform::Square => "square",
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
        })
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Pulse => "pulse",
            Transition::Ramp => "ramp",
        })
    }
}

/// What to drive a port's output towards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setpoint {
    /// Hold a constant level.
    Level(f64),
    /// Repeat a waveform between `min` and `max`.
    Cycle {
        shape: Waveform,
        min: f64,
        max: f64,
        period: f64,
        phase: f64,
    },
    /// Run once from `start` to `end` over `duration` seconds.
    OneShot {
        shape: Transition,
        start: f64,
        end: f64,
        duration: f64,
    },
}

impl Setpoint {
    /// The `set ...` command text.
    pub fn command(&self) -> String {
        match *self {
            Setpoint::Level(v) => format!("set {v}"),
            Setpoint::Cycle {
                shape,
                min,
                max,
                period,
                phase,
            } => format!("set {shape} {min} {max} {period} {phase}"),
            Setpoint::OneShot {
                shape,
                start,
                end,
                duration,
            } => format!("set {shape} {start} {end} {duration} 0"),
        }
    }

    /// The completion line to wait for, if the setpoint ends by itself.
    pub fn completion(&self, port: usize) -> Option<String> {
        match self {
            Setpoint::OneShot { shape, .. } => Some(format!("P{port}: {shape} done")),
            _ => None,
        }
    }
}

impl From<f64> for Setpoint {
    fn from(level: f64) -> Self {
        Setpoint::Level(level)
    }
}

/// Encoding of a field inside a mode's sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    U1,
    S1,
    U2,
    S2,
    U4,
    S4,
    F4,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::U1 => "u1",
            Format::S1 => "s1",
            Format::U2 => "u2",
            Format::S2 => "s2",
            Format::U4 => "u4",
            Format::S4 => "s4",
            Format::F4 => "f4",
        })
    }
}

/// A mode, by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ModeRef {
    fn from(index: usize) -> Self {
        ModeRef::Index(index)
    }
}

impl From<&str> for ModeRef {
    fn from(name: &str) -> Self {
        ModeRef::Name(name.to_string())
    }
}

impl From<String> for ModeRef {
    fn from(name: String) -> Self {
        ModeRef::Name(name)
    }
}

impl fmt::Display for ModeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeRef::Index(i) => write!(f, "{i}"),
            ModeRef::Name(n) => f.write_str(n),
        }
    }
}

/// A mode plus an optional window into its sample buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelector {
    pub mode: ModeRef,
    /// Byte offset and encoding of a single field to report.
    pub window: Option<(usize, Format)>,
}

impl ModeSelector {
    pub fn new(mode: impl Into<ModeRef>) -> Self {
        Self {
            mode: mode.into(),
            window: None,
        }
    }

    pub fn window(mut self, offset: usize, format: Format) -> Self {
        self.window = Some((offset, format));
        self
    }

    /// Arguments after the command word, once the mode is resolved to `index`.
    pub fn args(&self, index: usize) -> String {
        match self.window {
            Some((offset, format)) => format!("{index} {offset} {format}"),
            None => index.to_string(),
        }
    }
}

impl From<ModeRef> for ModeSelector {
    fn from(mode: ModeRef) -> Self {
        ModeSelector::new(mode)
    }
}

impl From<usize> for ModeSelector {
    fn from(index: usize) -> Self {
        ModeSelector::new(index)
    }
}

impl From<&str> for ModeSelector {
    fn from(name: &str) -> Self {
        ModeSelector::new(name)
    }
}

/// Closed-loop control settings for `pid`.
#[derive(Debug, Clone, PartialEq)]
pub struct PidConfig {
    /// Port whose sensor feeds the loop; usually the motor's own.
    pub source_port: usize,
    pub mode: usize,
    pub offset: usize,
    pub format: Format,
    pub scale: f64,
    /// Range after which the input wraps, 0 for none.
    pub unwrap: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub windup: f64,
}

impl PidConfig {
    pub fn command(&self) -> String {
        format!(
            "pid {} {} {} {} {} {} {} {} {} {}",
            self.source_port,
            self.mode,
            self.offset,
            self.format,
            self.scale,
            self.unwrap,
            self.kp,
            self.ki,
            self.kd,
            self.windup
        )
    }
}

/// One entry of a combined mode: a mode and the dataset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombiEntry {
    pub mode: usize,
    pub offset: usize,
}

/// The `combi <slot> <mode> <offset>...` command text.
pub fn combi_command(slot: usize, entries: &[CombiEntry]) -> String {
    entries.iter().fold(format!("combi {slot}"), |mut cmd, e| {
        cmd.push_str(&format!(" {} {}", e.mode, e.offset));
        cmd
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setpoint_commands() {
        assert_eq!(Setpoint::Level(0.5).command(), "set 0.5");
        assert_eq!(Setpoint::from(-1.0).command(), "set -1");

        let cycle = Setpoint::Cycle {
            shape: Waveform::Sine,
            min: -1.0,
            max: 1.0,
            period: 2.0,
            phase: 0.0,
        };
        assert_eq!(cycle.command(), "set sine -1 1 2 0");
        assert_eq!(cycle.completion(0), None);

        let ramp = Setpoint::OneShot {
            shape: Transition::Ramp,
            start: 0.0,
            end: 1.0,
            duration: 1.5,
        };
        assert_eq!(ramp.command(), "set ramp 0 1 1.5 0");
        assert_eq!(ramp.completion(2).as_deref(), Some("P2: ramp done"));
    }

    #[test]
    fn test_selector_args() {
        assert_eq!(ModeSelector::new(3usize).args(3), "3");
        assert_eq!(ModeSelector::new("pos").window(4, Format::S4).args(2), "2 4 s4");
    }

    #[test]
    fn test_pid_and_combi() {
        let pid = PidConfig {
            source_port: 0,
            mode: 1,
            offset: 0,
            format: Format::S2,
            scale: 0.0027777778,
            unwrap: 1.0,
            kp: 0.0,
            ki: 5.0,
            kd: 0.0,
            windup: 0.1,
        };
        assert_eq!(pid.command(), "pid 0 1 0 s2 0.0027777778 1 0 5 0 0.1");

        let entries = [CombiEntry { mode: 1, offset: 0 }, CombiEntry { mode: 2, offset: 0 }];
        assert_eq!(combi_command(0, &entries), "combi 0 1 0 2 0");
        assert_eq!(combi_command(1, &[]), "combi 1");
    }
}
