//! Base runtime for bugcheck diagnostic units.
//!
//! A diagnostic unit inspects one node of a CVP cluster, either live (local
//! shell or a remote session) or through an extracted debug bundle, and
//! reports a [`StatusRecord`](bugcheck_core::StatusRecord). This crate
//! provides everything a unit needs to do that:
//!
//! - [`exec`]: local, remote and fan-out command execution
//! - [`cache`]: per-key cache with advisory locks shared by every unit
//! - [`logs`]: file reads with grep, time-window and restart filtering
//! - [`certs`]: certificate discovery and validation
//! - [`k8s`]: `kubectl describe` parsing and pod filtering
//! - [`cluster`]: values exchanged between nodes
//! - [`unit`]: the unit context, lifecycle gates and the [`Bugcheck`] trait
//!
//! # Example
//!
//! ```rust,ignore
//! use bugcheck_runtime::{run_scan, Bugcheck, ConfigureOptions, UnitContext};
//!
//! let mut context = UnitContext::new();
//! context.configure(ConfigureOptions {
//!     metadata_path: Some("units/os_diskspace.json".into()),
//!     ..ConfigureOptions::default()
//! })?;
//! let mut unit = DiskSpace::new(context);
//! let outcome = run_scan(&mut unit).await?;
//! ```

pub mod cache;
pub mod certs;
pub mod cluster;
pub mod exec;
pub mod hash;
pub mod k8s;
pub mod logs;
pub mod session;
pub mod unit;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheKey, CachedValue, FileCache, MemoryCache};
pub use certs::{CertSource, CertValidation, CertificateRecord, CertificateStore, ValidateOptions};
pub use cluster::{ClusterStore, ClusterValues, MemoryClusterStore};
pub use exec::{ClusterMember, Executor, RunOptions, Target, Timeout};
pub use logs::ReadOptions;
pub use session::{RawOutput, RemoteSession, SshSession};
pub use unit::{
    run_patch, run_scan, ActionReport, ActionVerdict, Bugcheck, ConfigureOptions, Gate, NodeConfig, PatchOutcome,
    ScanOutcome, UnitConfig, UnitContext, UnitMetadata,
};

/// Version of this runtime, checked against each unit's `bug_engine_version`
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
