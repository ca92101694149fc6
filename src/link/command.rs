use std::fmt;

/// Separator the board accepts between commands on one line.
pub const COMMAND_SEPARATOR: &str = "; ";

/// One physical command line: one or more commands joined with `"; "`.
///
/// An empty list is valid and produces a bare carriage return, which the
/// board answers with a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append another command to this line.
    pub fn then(mut self, cmd: impl Into<String>) -> Self {
        self.0.push(cmd.into());
        self
    }

    /// Put `cmd` in front of the existing commands.
    pub fn prefixed(mut self, cmd: impl Into<String>) -> Self {
        self.0.insert(0, cmd.into());
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The text written to the wire, without the terminator.
    pub fn joined(&self) -> String {
        self.0.join(COMMAND_SEPARATOR)
    }

    /// The bytes written to the wire, terminated by a single CR.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.joined().into_bytes();
        bytes.push(b'\r');
        bytes
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl From<&str> for CommandLine {
    fn from(cmd: &str) -> Self {
        Self(vec![cmd.to_string()])
    }
}

impl From<String> for CommandLine {
    fn from(cmd: String) -> Self {
        Self(vec![cmd])
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(cmds: Vec<String>) -> Self {
        Self(cmds)
    }
}

impl From<&[&str]> for CommandLine {
    fn from(cmds: &[&str]) -> Self {
        Self(cmds.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(cmds: [&str; N]) -> Self {
        Self(cmds.iter().map(|c| c.to_string()).collect())
    }
}
