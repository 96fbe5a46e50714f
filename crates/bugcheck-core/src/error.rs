use thiserror::Error;

/// Result type alias for bugcheck operations
pub type Result<T> = std::result::Result<T, BugcheckError>;

/// Errors that can occur while configuring or running a bugcheck
///
/// Structural variants point at a broken unit or a caller asking for
/// something that cannot exist; they must stop the unit. Environmental
/// variants describe data that could not be obtained and are normally
/// converted into an `UNAVAILABLE` status by the unit.
#[derive(Error, Debug)]
pub enum BugcheckError {
    /// The unit did not provide a scan implementation
    #[error("a scan action was not defined for {unit}")]
    ScanNotImplemented {
        /// Name of the unit, if configured
        unit: String,
    },

    /// An unknown action was passed to the component-action helper
    #[error("action {action} is not allowed, valid actions are: {allowed}")]
    InvalidAction {
        /// Action that was requested
        action: String,
        /// Comma separated list of accepted actions
        allowed: String,
    },

    /// The runtime engine cannot run this unit
    #[error("this bugcheck requires engine {required} (currently using {current})")]
    IncompatibleEngine {
        /// Requirement declared by the unit, e.g. `3.x.x` or `3.5.x`
        required: String,
        /// Version of the running engine
        current: String,
    },

    /// The unit did not declare which engine version it needs
    #[error("no bug_engine_version declared, refusing to load")]
    MissingEngineVersion,

    /// A certificate name is not known to the store
    #[error("certificate {name} not found")]
    CertificateNotFound {
        /// Certificate display name
        name: String,
    },

    /// A certificate exists but not under the requested source
    #[error("certificate {name} has no {origin} source")]
    CertificateSourceNotFound {
        /// Certificate display name
        name: String,
        /// Requested source
        origin: String,
    },

    /// Certificate contents could not be decoded
    #[error("could not load certificate {name}: {reason}")]
    CertificateParse {
        /// Certificate display name or origin
        name: String,
        /// Decoder error
        reason: String,
    },

    /// A version string could not be parsed
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// An unknown version comparison operator was used
    #[error("invalid comparison: {0}")]
    InvalidComparison(String),

    /// `kubectl describe` output could not be parsed
    #[error("describe output parse error at line {line}: {reason}")]
    DescribeParse {
        /// 1-based line number in the describe output
        line: usize,
        /// What went wrong
        reason: String,
    },

    /// A described resource is missing an attribute a filter depends on
    #[error("error reading {resource} attributes: missing {attribute}")]
    MissingAttribute {
        /// Resource or container name
        resource: String,
        /// Attribute path that was missing
        attribute: String,
    },

    /// The resource kind cannot be read in the current mode
    #[error("cannot read kubernetes resource type {kind} from local logs")]
    UnsupportedResource {
        /// Requested resource kind
        kind: String,
    },

    /// The node configuration does not carry a cluster role
    #[error("node role is not configured")]
    MissingRole,

    /// No cluster store was configured for this unit
    #[error("no cluster store configured")]
    NoClusterStore,

    /// The product version could not be determined
    #[error("could not determine CVP version: {0}")]
    VersionUnavailable(String),

    /// Unit metadata descriptor is invalid
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Remote session failure
    #[error("session error on {host}: {reason}")]
    Session {
        /// Host the session points at
        host: String,
        /// Error reported by the session
        reason: String,
    },

    /// A command did not finish in time
    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path or resource being accessed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BugcheckError {
    /// Build an I/O error tagged with the path being accessed
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error indicates a broken unit or caller misuse
    /// rather than an environmental condition
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ScanNotImplemented { .. }
                | Self::InvalidAction { .. }
                | Self::IncompatibleEngine { .. }
                | Self::MissingEngineVersion
                | Self::CertificateNotFound { .. }
                | Self::CertificateSourceNotFound { .. }
                | Self::InvalidComparison(_)
                | Self::UnsupportedResource { .. }
        )
    }
}
