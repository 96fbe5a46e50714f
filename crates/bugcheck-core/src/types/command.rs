use serde::{Deserialize, Serialize};

/// Placeholder line returned by [`CommandResult::stdout`] and
/// [`CommandResult::stderr`] when the command ran on several hosts
pub const MULTIPLE_HOSTS: &str = "{multiple}";

/// Output of a command on a single host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Lines written to stdout
    pub stdout: Vec<String>,
    /// Lines written to stderr
    pub stderr: Vec<String>,
    /// Process exit code, `None` when the command could not be run at all
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Output of a command that could not be run (no session, spawn or
    /// transport failure). Callers must read this as "could not determine".
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }

    /// Build an output from raw process streams.
    ///
    /// Streams are trimmed and split into lines. A stream that is not valid
    /// UTF-8 becomes an empty line sequence instead of failing the call.
    #[must_use]
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_code: Option<i32>) -> Self {
        Self {
            stdout: decode_lines(stdout),
            stderr: decode_lines(stderr),
            exit_code,
        }
    }

    /// Build an output from literal stdout lines
    #[must_use]
    pub fn lines(stdout: &[&str], exit_code: i32) -> Self {
        Self {
            stdout: stdout.iter().map(|l| (*l).to_string()).collect(),
            stderr: Vec::new(),
            exit_code: Some(exit_code),
        }
    }

    /// Returns true if the command could not be run
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        self.exit_code.is_none()
    }
}

fn decode_lines(raw: &[u8]) -> Vec<String> {
    std::str::from_utf8(raw).map_or_else(
        |_| Vec::new(),
        |text| text.trim().lines().map(str::to_string).collect(),
    )
}

/// Immutable result of running one command on one or more hosts
///
/// Hosts keep the order in which they were attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    members: Vec<(String, CommandOutput)>,
}

impl CommandResult {
    /// Result of a command run on a single host
    #[must_use]
    pub fn single(host: impl Into<String>, output: CommandOutput) -> Self {
        Self {
            members: vec![(host.into(), output)],
        }
    }

    /// Result of a command fanned out across several hosts
    #[must_use]
    pub const fn fan_out(members: Vec<(String, CommandOutput)>) -> Self {
        Self { members }
    }

    /// Host names in the order they were attempted
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(host, _)| host.as_str())
    }

    /// Per-host outputs in the order they were attempted
    #[must_use]
    pub fn members(&self) -> &[(String, CommandOutput)] {
        &self.members
    }

    /// Output of a specific host
    #[must_use]
    pub fn host(&self, name: &str) -> Option<&CommandOutput> {
        self.members
            .iter()
            .find(|(host, _)| host == name)
            .map(|(_, output)| output)
    }

    /// Stdout of the single host, or [`MULTIPLE_HOSTS`] for fan-out results
    #[must_use]
    pub fn stdout(&self) -> Vec<String> {
        self.collapse(|output| &output.stdout)
    }

    /// Stderr of the single host, or [`MULTIPLE_HOSTS`] for fan-out results
    #[must_use]
    pub fn stderr(&self) -> Vec<String> {
        self.collapse(|output| &output.stderr)
    }

    fn collapse(&self, stream: impl Fn(&CommandOutput) -> &Vec<String>) -> Vec<String> {
        match self.members.as_slice() {
            [] => Vec::new(),
            [(_, output)] => stream(output).clone(),
            _ => vec![MULTIPLE_HOSTS.to_string()],
        }
    }

    /// Aggregate exit code: 0 if every host returned 0, otherwise the first
    /// non-zero code in attempt order. Hosts without an exit code count as 0.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.members
            .iter()
            .filter_map(|(_, output)| output.exit_code)
            .find(|code| *code != 0)
            .unwrap_or(0)
    }

    /// Returns true if no host produced any output or exit code
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.members.iter().all(|(_, output)| output.is_unavailable())
    }
}
