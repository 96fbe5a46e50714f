use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Normalized verdict of a diagnostic unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    /// No issue exists
    Ok,
    /// An issue may exist or a value is close to a threshold
    Warning,
    /// An issue was found
    Error,
    /// No issue, but something worth showing to the operator
    Info,
    /// The check could not be performed because data was missing
    Unavailable,
    /// The check is meaningless in the current mode
    Unsupported,
}

impl StatusCode {
    /// Numeric code as reported to the driver
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Info => 3,
            Self::Unavailable => -1,
            Self::Unsupported => -2,
        }
    }

    /// Returns true for WARNING and ERROR
    #[must_use]
    pub const fn is_issue(self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Info => write!(f, "INFO"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// Sections of a status record addressable by dependent units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSection {
    /// The status code
    Code,
    /// The operator-facing message
    Message,
    /// The free-form payload
    Extra,
    /// Diagnostic source references
    Sources,
    /// Whether the unit has run
    HasRun,
}

/// Status of one unit for one scan/patch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Verdict
    pub code: StatusCode,

    /// Complete, self-contained explanation for the operator
    #[serde(default)]
    pub message: Option<String>,

    /// Affected resources, counts or any structured payload
    #[serde(default)]
    pub extra: Value,

    /// References to the files or commands the verdict was derived from
    #[serde(default)]
    pub sources: Vec<String>,

    /// Whether the unit has been run at least once
    #[serde(default)]
    pub has_run: bool,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::initial()
    }
}

impl StatusRecord {
    /// Status of a unit that has not run yet
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            code: StatusCode::Ok,
            message: None,
            extra: Value::Null,
            sources: Vec::new(),
            has_run: false,
        }
    }

    /// Status of a completed run
    #[must_use]
    pub fn new(code: StatusCode, message: Option<String>, extra: Value) -> Self {
        Self {
            code,
            message,
            extra,
            sources: Vec::new(),
            has_run: true,
        }
    }

    /// Attach diagnostic source references
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Read a single section as a JSON value
    #[must_use]
    pub fn section(&self, section: StatusSection) -> Value {
        match section {
            StatusSection::Code => Value::from(self.code.as_i32()),
            StatusSection::Message => self
                .message
                .as_ref()
                .map_or(Value::Null, |m| Value::String(m.clone())),
            StatusSection::Extra => self.extra.clone(),
            StatusSection::Sources => Value::from(self.sources.clone()),
            StatusSection::HasRun => Value::Bool(self.has_run),
        }
    }
}
