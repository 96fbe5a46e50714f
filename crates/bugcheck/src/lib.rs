//! Diagnostic-unit runtime for CVP clusters.
//!
//! A diagnostic unit ("bugcheck") inspects one node of a cluster, either
//! live or through an extracted debug bundle, reports a status and can
//! optionally remediate what it found.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bugcheck::units::DiskSpace;
//! use bugcheck::{run_scan, Bugcheck, ConfigureOptions, NodeConfig, UnitContext};
//!
//! #[tokio::main]
//! async fn main() -> bugcheck::Result<()> {
//!     let mut context = UnitContext::new();
//!     context.configure(ConfigureOptions {
//!         node: Some(NodeConfig {
//!             debug_log_dir: Some("/tmp/bundle/nodes/cvp1/logs".into()),
//!             debug_cmd_dir: Some("/tmp/bundle/nodes/cvp1/commands".into()),
//!             ..NodeConfig::default()
//!         }),
//!         metadata_path: Some("units/os_diskspace.json".into()),
//!         ..ConfigureOptions::default()
//!     })?;
//!
//!     let mut unit = DiskSpace::new(context);
//!     run_scan(&mut unit).await?;
//!     println!("{}", unit.context().info()?);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `default` - Includes the reference units
//! - `units` - Disk space, file consistency and certificate expiration units
//! - `testing` - Scripted remote sessions for unit tests

// Re-export core types
pub use bugcheck_core::*;

// Re-export the runtime
pub use bugcheck_runtime::{
    cache, certs, cluster, exec, k8s, logs, run_patch, run_scan, session, unit, ActionReport, ActionVerdict, Bugcheck,
    CacheKey, CachedValue, CertSource, CertValidation, CertificateRecord, CertificateStore, ClusterMember,
    ClusterStore, ClusterValues, ConfigureOptions, Executor, FileCache, Gate, MemoryCache, MemoryClusterStore,
    NodeConfig, PatchOutcome, RawOutput, ReadOptions, RemoteSession, RunOptions, ScanOutcome, SshSession, Target,
    Timeout, UnitConfig, UnitContext, UnitMetadata, ValidateOptions, ENGINE_VERSION,
};

#[cfg(feature = "testing")]
pub use bugcheck_runtime::testing;

// Re-export units if enabled
#[cfg(feature = "units")]
pub use bugcheck_units as units;

// Re-export runtime for convenience
pub use serde_json;
pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_version_is_the_crate_version() {
        let engine: Version = ENGINE_VERSION.parse().unwrap();
        assert_eq!(engine, Version::new(3, 5, 0));
    }

    #[test]
    fn default_scan_reports_unnamed_unit() {
        struct Bare(UnitContext);

        impl Bugcheck for Bare {
            fn context(&self) -> &UnitContext {
                &self.0
            }

            fn context_mut(&mut self) -> &mut UnitContext {
                &mut self.0
            }
        }

        let mut bare = Bare(UnitContext::new());
        assert_eq!(bare.context().state(), unit::UnitState::Unconfigured);
        assert!(!bare.context().get_status().has_run);

        let err = tokio_test::block_on(bare.scan()).unwrap_err();
        assert!(matches!(err, BugcheckError::ScanNotImplemented { unit } if unit == "unnamed unit"));
    }
}
