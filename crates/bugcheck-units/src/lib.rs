//! Reference diagnostic units built on [`bugcheck_runtime`].
//!
//! | unit | checks |
//! |------|--------|
//! | [`DiskSpace`] | usage of the root and data partitions |
//! | [`FilesMismatch`] | files that must be identical on every node |
//! | [`CertExpiration`] | expired or soon to expire TLS certificates |
//!
//! # Example
//!
//! ```rust,ignore
//! use bugcheck_runtime::{run_scan, ConfigureOptions, UnitContext};
//! use bugcheck_units::DiskSpace;
//!
//! let mut context = UnitContext::new();
//! context.configure(ConfigureOptions {
//!     metadata_path: Some("units/os_diskspace.json".into()),
//!     ..ConfigureOptions::default()
//! })?;
//! let mut unit = DiskSpace::new(context);
//! run_scan(&mut unit).await?;
//! println!("{:?}", unit.context().get_status());
//! ```

mod cert_expiration;
mod disk_space;
mod files_mismatch;

#[cfg(test)]
mod test_support;

pub use cert_expiration::{CertExpiration, CHECKED_CERTIFICATES};
pub use disk_space::{DiskSpace, DEFAULT_PARTITIONS};
pub use files_mismatch::{FilesMismatch, CONSISTENT_FILES};

/// Message recorded by units that need a live node
pub const LIVE_ONLY: &str = "Supported only in live mode";
