//! Certificate store.
//!
//! Certificates are discovered once, eagerly, from the TLS directory on the
//! node and from Kubernetes secrets. Each certificate name can have a
//! filesystem copy, a Kubernetes copy, or both.

mod discovery;
mod record;
mod validate;

pub use discovery::{SecretSource, DEFAULT_CERT_DIR};
pub use record::CertificateRecord;
pub use validate::{CertValidation, ValidateOptions, DEFAULT_WARNING_DAYS};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use bugcheck_core::{BugcheckError, Result};

/// Name of the root certificate chains are validated against
pub const CA_CERT: &str = "ca.crt";

/// Where a certificate was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CertSource {
    /// Certificate file on the node
    #[serde(rename = "filesystem")]
    Filesystem,
    /// Kubernetes secret
    #[serde(rename = "k8s")]
    Kubernetes,
}

impl CertSource {
    /// Short name used in validation messages
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Kubernetes => "k8s",
        }
    }
}

impl fmt::Display for CertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every certificate known to a unit, by display name and source
#[derive(Debug, Clone, Default)]
pub struct CertificateStore {
    certificates: BTreeMap<String, BTreeMap<CertSource, CertificateRecord>>,
}

impl CertificateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the `source` copy of `name`
    pub fn insert(&mut self, name: impl Into<String>, source: CertSource, record: CertificateRecord) {
        self.certificates
            .entry(name.into())
            .or_default()
            .insert(source, record);
    }

    /// Record `name` as known even though no copy of it could be loaded
    pub(crate) fn declare(&mut self, name: impl Into<String>) {
        self.certificates.entry(name.into()).or_default();
    }

    /// Certificate `name`. Without a source the Kubernetes copy is
    /// preferred over the filesystem one.
    #[must_use]
    pub fn get(&self, name: &str, source: Option<CertSource>) -> Option<&CertificateRecord> {
        let copies = self.certificates.get(name)?;
        match source {
            Some(source) => copies.get(&source),
            None => copies
                .get(&CertSource::Kubernetes)
                .or_else(|| copies.get(&CertSource::Filesystem)),
        }
    }

    /// Names of every known certificate
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.certificates.keys().map(String::as_str)
    }

    /// Sources `name` was found in, `None` for an unknown name
    #[must_use]
    pub fn sources(&self, name: &str) -> Option<Vec<CertSource>> {
        self.certificates
            .get(name)
            .map(|copies| copies.keys().copied().collect())
    }

    /// Number of certificate names
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns true if no certificate was found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// The `source` copy of `name`, or the matching not-found error
    pub fn record(&self, name: &str, source: CertSource) -> Result<&CertificateRecord> {
        let copies = self
            .certificates
            .get(name)
            .ok_or_else(|| BugcheckError::CertificateNotFound {
                name: name.to_string(),
            })?;
        copies
            .get(&source)
            .ok_or_else(|| BugcheckError::CertificateSourceNotFound {
                name: name.to_string(),
                origin: source.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(tag: &[u8]) -> CertificateRecord {
        let now = Utc::now();
        CertificateRecord::from_parts(now - Duration::days(1), now + Duration::days(365), tag.to_vec())
    }

    #[test]
    fn get_prefers_kubernetes_copy() {
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, record(b"fs"));
        store.insert("cvp.crt", CertSource::Kubernetes, record(b"k8s"));
        store.insert("aerisadmin.crt", CertSource::Filesystem, record(b"admin"));

        assert_eq!(store.get("cvp.crt", None).unwrap().der, b"k8s");
        assert_eq!(store.get("cvp.crt", Some(CertSource::Filesystem)).unwrap().der, b"fs");
        assert_eq!(store.get("aerisadmin.crt", None).unwrap().der, b"admin");
        assert!(store.get("aerisadmin.crt", Some(CertSource::Kubernetes)).is_none());
        assert!(store.get("missing.crt", None).is_none());

        assert_eq!(store.list().collect::<Vec<_>>(), vec!["aerisadmin.crt", "cvp.crt"]);
        assert_eq!(
            store.sources("cvp.crt"),
            Some(vec![CertSource::Filesystem, CertSource::Kubernetes])
        );
        assert_eq!(store.sources("missing.crt"), None);
    }

    #[test]
    fn record_distinguishes_missing_name_and_source() {
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, record(b"fs"));

        assert!(matches!(
            store.record("nope.crt", CertSource::Filesystem),
            Err(BugcheckError::CertificateNotFound { .. })
        ));
        assert!(matches!(
            store.record("cvp.crt", CertSource::Kubernetes),
            Err(BugcheckError::CertificateSourceNotFound { .. })
        ));
    }
}
