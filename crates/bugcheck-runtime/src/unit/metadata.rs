//! Unit metadata descriptors.
//!
//! Every unit ships a JSON descriptor next to its code:
//!
//! ```json
//! {
//!   "name": "cvp_files_mismatch",
//!   "description": "Configuration files differ between nodes",
//!   "bug_engine_version": "3.4.0",
//!   "conditions": [{"introduced_in": "2020.1.0", "fixed_in": "2021.2.0"}],
//!   "scan": {"privileges": "cvp"},
//!   "patch": {"privileges": "root", "component_requirements": "hbase"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use bugcheck_core::{BugcheckError, Result, Version};

/// Parsed metadata descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Engine version the unit was written against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_engine_version: Option<Version>,

    /// Product versions the issue exists in. Empty means every version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Requirements for scanning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<Requirements>,

    /// Requirements for patching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Requirements>,

    /// Any other descriptor keys, kept as-is
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Product version range an issue exists in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// First affected version, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced_in: Option<Version>,
    /// First fixed version, exclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_in: Option<Version>,
}

impl Condition {
    /// Returns true if the condition has no version bounds
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.introduced_in.is_none() && self.fixed_in.is_none()
    }

    /// Returns true if `version` falls inside the range
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        let introduced = self.introduced_in.as_ref().map_or(true, |v| version >= v);
        let fixed = self.fixed_in.as_ref().map_or(true, |v| version < v);
        introduced && fixed
    }
}

/// Who can run an action and which components must be running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// User required besides `root`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileges: Option<String>,
    /// Component that must report a healthy `cvpi status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_requirements: Option<String>,
}

impl UnitMetadata {
    /// Load a descriptor from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BugcheckError::io(path.display().to_string(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| BugcheckError::Metadata(format!("{}: {e}", path.display())))
    }
}
