//! Unit and node configuration.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use bugcheck_core::{ClusterMode, Role};

use super::metadata::UnitMetadata;
use crate::cache::FileCache;
use crate::certs::DEFAULT_CERT_DIR;
use crate::cluster::ClusterStore;
use crate::exec::ClusterMember;
use crate::session::RemoteSession;

/// Configuration of one unit instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit name, also the default cluster value key
    #[serde(default)]
    pub name: Option<String>,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Node this instance inspects
    #[serde(default)]
    pub node: NodeConfig,

    /// Only keep log lines written after this instant
    #[serde(default)]
    pub logs_from: Option<NaiveDateTime>,

    /// Default command timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Drop file content written before the last service restart
    #[serde(default)]
    pub read_files_only_from_last_service_restart: bool,

    /// Directory scanned for certificate files
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Verbosity passed to `cvpi -v`
    #[serde(default = "default_cvpi_verbosity")]
    pub cvpi_verbosity: u8,

    /// Descriptor loaded from the unit's metadata file
    #[serde(default)]
    pub metadata: UnitMetadata,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            node: NodeConfig::default(),
            logs_from: None,
            timeout: None,
            read_files_only_from_last_service_restart: false,
            cert_dir: default_cert_dir(),
            cvpi_verbosity: default_cvpi_verbosity(),
            metadata: UnitMetadata::default(),
        }
    }
}

/// The node a unit instance runs against
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname of the node, unset for the local host
    #[serde(default)]
    pub host: Option<String>,

    /// Position of the node in the cluster
    #[serde(default)]
    pub role: Option<Role>,

    /// User the session logs in as
    #[serde(default)]
    pub username: Option<String>,

    /// Always go through the session, even for the local host
    #[serde(default)]
    pub force_ssh: bool,

    /// Deployment mode, if known
    #[serde(default)]
    pub cluster_mode: Option<ClusterMode>,

    /// Every cluster member, for commands run on all nodes
    #[serde(default)]
    pub members: Vec<ClusterMember>,

    /// Session to `host`
    #[serde(skip)]
    pub session: Option<Arc<dyn RemoteSession>>,

    /// Bundle logs directory of this node
    #[serde(default)]
    pub debug_log_dir: Option<String>,

    /// Bundle command outputs directory of this node
    #[serde(default)]
    pub debug_cmd_dir: Option<String>,
}

/// Directories of an extracted bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// The node's captured logs
    Logs,
    /// The node's captured command outputs
    Commands,
    /// Root of the extracted bundle
    Root,
}

/// Settings applied by [`UnitContext::configure`](super::UnitContext::configure).
///
/// Only the fields that are set replace the current configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    /// Unit name
    pub name: Option<String>,
    /// One-line description
    pub description: Option<String>,
    /// Node the unit inspects
    pub node: Option<NodeConfig>,
    /// Ignore log lines older than this
    pub logs_from: Option<NaiveDateTime>,
    /// Command timeout in seconds
    pub timeout: Option<u64>,
    /// Drop log lines written before the last service restart
    pub read_files_only_from_last_service_restart: Option<bool>,
    /// Directory scanned for certificates
    pub cert_dir: Option<PathBuf>,
    /// Verbosity passed to `cvpi -v`
    pub cvpi_verbosity: Option<u8>,
    /// Metadata descriptor, merged over the fields above
    pub metadata: Option<UnitMetadata>,
    /// JSON file holding the metadata descriptor
    pub metadata_path: Option<PathBuf>,
    /// Shared command and file cache
    pub cache: Option<Arc<dyn FileCache>>,
    /// Store for values shared between nodes
    pub cluster_store: Option<Arc<dyn ClusterStore>>,
    /// Skip the engine compatibility check
    pub bootstrap: bool,
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERT_DIR)
}

const fn default_cvpi_verbosity() -> u8 {
    1
}
