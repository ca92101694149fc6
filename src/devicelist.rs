//! Parser for the board's device inventory.
//!
//! The `list` command answers with a block of text per port, ports `0..4`
//! back to back. Each block is a small, irregular grammar with no length
//! prefix, so it is parsed by recursive descent over a cursor:
//!
//! ```text
//! P<n>: no device ...                      -> None
//! P<n>: connected ...
//! type <hex>
//! <name> = <decimal>                       (zero or more; nmodes among them)
//! M<i> <name...> SI=<unit>                 \
//! format count=<c> type=<t> chars=<ch> dp=<d>  > once per mode, i = 0..=nmodes
//! <unit>: <hexmin> <hexmax> ...            /
//! C<n>: <combi>                            (zero or more)
//! <name> PID: <v1> <v2> <v3> <v4>          (zero or more, hex)
//! ```
//!
//! The parser never mutates its input; it advances an index, so the same
//! lines can be re-parsed or inspected after a failure.

use crate::device::{lookup_type, DeviceClass, DeviceType};
use crate::error::{GrammarError, GrammarRule};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of ports on the board.
pub const PORT_COUNT: usize = 4;

/// Descriptors for all ports, indexed by port; `None` where nothing is attached.
pub type DeviceList = [Option<DeviceInfo>; PORT_COUNT];

macro_rules! grammar {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid regex"));
    };
}

grammar!(NO_DEVICE, r"(?i)^P\d+:\s+no\s+device");
grammar!(CONNECTED, r"(?i)^P\d+:\s+connected");
grammar!(TYPE_LINE, r"(?i)^\s*type\s+(\S+)");
grammar!(VAR_LINE, r"^\s*(\w+)\s*=\s*(\d+)$");
grammar!(MODE_HEADER, r"(?i)^\s*M(\d+)\s+(\S+(?:\s+\S+)*)\s+SI\s*=\s*(\S*)");
grammar!(
    FORMAT_LINE,
    r"(?i)^\s*format\s+count=(\d+)\s+type=(\d+)\s+chars=(\d+)\s+dp=(\d+)"
);
grammar!(LIMIT, r"(?i)(\w+):\s*([0-9a-f]+)\s+([0-9a-f]+)");
grammar!(COMBI_LINE, r"(?i)^\s*C\d+:\s*(\S.*)$");
grammar!(PID_LINE, r"(?i)^\s*(\w+)\s+PID:\s*(.+)");
grammar!(MODE_RESPONSE, r"^P\d+M\d+:\s*(.*)");

/// Binary layout of one mode's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeFormat {
    pub count: u32,
    #[serde(rename = "type")]
    pub kind: u32,
    pub chars: u32,
    pub dp: u32,
}

/// Value range of a mode in one unit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub min: i64,
    pub max: i64,
}

/// A named data channel of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mode {
    /// Position in the device's mode table.
    pub index: usize,
    pub name: String,
    pub unit: String,
    pub format: ModeFormat,
    /// Keyed by lower-cased unit kind, typically `raw`, `pct` and `si`.
    pub limits: BTreeMap<String, Limit>,
}

/// Everything the board reports about one attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub vars: BTreeMap<String, i64>,
    pub modes: Vec<Mode>,
    pub combi: Vec<String>,
    pub pids: BTreeMap<String, [i64; 4]>,
}

impl DeviceInfo {
    pub fn type_id(&self) -> u32 {
        self.device_type.id
    }

    pub fn class(&self) -> DeviceClass {
        self.device_type.class
    }

    /// Look a mode up by name, ignoring case.
    pub fn mode_named(&self, name: &str) -> Option<&Mode> {
        self.modes.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// The descriptor as a JSON object, in the shape the board's own
    /// tooling reports it.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Cursor-based parser over an ordered sequence of lines.
#[derive(Debug, Clone)]
pub struct DeviceListParser<'a, S> {
    lines: &'a [S],
    pos: usize,
}

impl<'a, S: AsRef<str>> DeviceListParser<'a, S> {
    pub fn new(lines: &'a [S]) -> Self {
        Self { lines, pos: 0 }
    }

    /// Index of the next unconsumed line.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Lines not consumed so far.
    pub fn remaining(&self) -> &'a [S] {
        &self.lines[self.pos..]
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).map(|l| l.as_ref())
    }

    fn next_line(&mut self, rule: GrammarRule) -> Result<&'a str, GrammarError> {
        let line = self.peek().ok_or(GrammarError::truncated(rule))?;
        self.pos += 1;
        Ok(line)
    }

    fn expect(&mut self, want: &Regex, rule: GrammarRule) -> Result<Captures<'a>, GrammarError> {
        let line = self.next_line(rule)?;
        want.captures(line).ok_or_else(|| GrammarError::at(rule, line))
    }

    /// Consume lines for as long as they match `want`.
    fn all_of(&mut self, want: &Regex) -> Vec<Captures<'a>> {
        let mut out = Vec::new();
        while let Some(caps) = self.peek().and_then(|line| want.captures(line)) {
            self.pos += 1;
            out.push(caps);
        }
        out
    }

    /// Parse all four ports, in order.
    pub fn parse_list(&mut self) -> Result<DeviceList, GrammarError> {
        Ok([
            self.parse_port(0)?,
            self.parse_port(1)?,
            self.parse_port(2)?,
            self.parse_port(3)?,
        ])
    }

    /// Parse one port's block, starting at its `P<port>:` header.
    pub fn parse_port(&mut self, port: usize) -> Result<Option<DeviceInfo>, GrammarError> {
        let header_rule = GrammarRule::PortHeader { port };
        let header = self.next_line(header_rule)?;

        if !header.starts_with(&format!("P{port}:")) {
            return Err(GrammarError::at(header_rule, header));
        }
        if NO_DEVICE.is_match(header) {
            return Ok(None);
        }
        if !CONNECTED.is_match(header) {
            return Err(GrammarError::at(GrammarRule::Connected { port }, header));
        }

        let type_caps = self.expect(&TYPE_LINE, GrammarRule::TypeLine)?;
        let type_id = u32::from_str_radix(&type_caps[1], 16).map_err(|_| {
            GrammarError::at(GrammarRule::TypeLine, self.lines[self.pos - 1].as_ref())
        })?;
        let device_type = lookup_type(type_id);

        let mut vars = BTreeMap::new();
        let mut nmodes_line = "";
        for caps in self.all_of(&VAR_LINE) {
            // `\d+` that overflows i64 is not a variable line either.
            if let Ok(value) = caps[2].parse::<i64>() {
                let name = caps[1].to_lowercase();
                if name == "nmodes" {
                    nmodes_line = caps.get(0).map_or("", |m| m.as_str());
                }
                vars.insert(name, value);
            }
        }

        // Absent `nmodes` means no mode table.
        let mode_count = match vars.get("nmodes") {
            None => 0,
            Some(&nmodes) => nmodes
                .checked_add(1)
                .and_then(|count| usize::try_from(count).ok())
                .ok_or_else(|| GrammarError::at(GrammarRule::ModeCount, nmodes_line))?,
        };
        let modes = (0..mode_count)
            .map(|index| self.parse_mode(index))
            .collect::<Result<Vec<_>, _>>()?;

        let combi = self
            .all_of(&COMBI_LINE)
            .iter()
            .map(|caps| caps[1].to_string())
            .collect();

        let mut pids = BTreeMap::new();
        for caps in self.all_of(&PID_LINE) {
            let line = caps.get(0).map_or("", |m| m.as_str());
            let values = caps[2]
                .split_whitespace()
                .map(|v| i64::from_str_radix(v, 16))
                .collect::<Result<Vec<_>, _>>()
                .ok()
                .and_then(|v| <[i64; 4]>::try_from(v).ok())
                .ok_or_else(|| GrammarError::at(GrammarRule::PidLine, line))?;
            pids.insert(caps[1].to_string(), values);
        }

        Ok(Some(DeviceInfo {
            device_type,
            vars,
            modes,
            combi,
            pids,
        }))
    }

    fn parse_mode(&mut self, index: usize) -> Result<Mode, GrammarError> {
        let header_rule = GrammarRule::ModeHeader { index };
        let header = self.next_line(header_rule)?;
        let caps = MODE_HEADER
            .captures(header)
            .ok_or_else(|| GrammarError::at(header_rule, header))?;
        let found: usize = caps[1]
            .parse()
            .map_err(|_| GrammarError::at(header_rule, header))?;
        if found != index {
            return Err(GrammarError::at(
                GrammarRule::ModeNumber {
                    expected: index,
                    found,
                },
                header,
            ));
        }
        let name = caps[2].to_lowercase();
        let unit = caps[3].to_lowercase();

        let format_rule = GrammarRule::FormatLine { index };
        let format_line = self.next_line(format_rule)?;
        let fm = FORMAT_LINE
            .captures(format_line)
            .ok_or_else(|| GrammarError::at(format_rule, format_line))?;
        let field = |i: usize| {
            fm[i]
                .parse::<u32>()
                .map_err(|_| GrammarError::at(format_rule, format_line))
        };
        let format = ModeFormat {
            count: field(1)?,
            kind: field(2)?,
            chars: field(3)?,
            dp: field(4)?,
        };

        let limits_rule = GrammarRule::LimitsLine { index };
        let limits_line = self.next_line(limits_rule)?;
        let mut limits = BTreeMap::new();
        for lm in LIMIT.captures_iter(limits_line) {
            let bound = |s: &str| {
                i64::from_str_radix(s, 16).map_err(|_| GrammarError::at(limits_rule, limits_line))
            };
            limits.insert(
                lm[1].to_lowercase(),
                Limit {
                    min: bound(&lm[2])?,
                    max: bound(&lm[3])?,
                },
            );
        }

        Ok(Mode {
            index,
            name,
            unit,
            format,
            limits,
        })
    }
}

/// Parse a full `list` response: four ports back to back.
pub fn parse_device_list<S: AsRef<str>>(lines: &[S]) -> Result<DeviceList, GrammarError> {
    DeviceListParser::new(lines).parse_list()
}

/// Parse a single port's block, e.g. the window captured during a connect
/// handshake.
pub fn parse_device<S: AsRef<str>>(
    lines: &[S],
    port: usize,
) -> Result<Option<DeviceInfo>, GrammarError> {
    DeviceListParser::new(lines).parse_port(port)
}

/// Parse the values of a `P<n>M<m>: <values...>` sample line.
pub fn parse_mode_response(line: &str) -> Result<Vec<f64>, GrammarError> {
    let caps = MODE_RESPONSE
        .captures(line)
        .ok_or_else(|| GrammarError::at(GrammarRule::ModeResponse, line))?;
    caps[1]
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| GrammarError::at(GrammarRule::ModeResponse, line))
}
