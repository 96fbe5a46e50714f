//! Certificate predicates and the aggregated validation verdict.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use bugcheck_core::{BugcheckError, Result};

use super::{CertSource, CertificateStore, CA_CERT};

/// Default number of days before expiry a certificate is flagged
pub const DEFAULT_WARNING_DAYS: i64 = 30;

/// Which checks [`CertificateStore::validate`] runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Verify the chain against `ca.crt`
    pub chain: bool,
    /// Flag certificates that are not valid yet
    pub start_date: bool,
    /// Flag expired or soon-to-expire certificates
    pub expiration: bool,
    /// Require the filesystem and Kubernetes copies to match
    pub sources: bool,
    /// Days before expiry that count as "close to expiration"
    pub warning_days: i64,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            chain: true,
            start_date: true,
            expiration: true,
            sources: true,
            warning_days: DEFAULT_WARNING_DAYS,
        }
    }
}

/// Verdict for one certificate name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertValidation {
    /// True when no check failed
    pub valid: bool,
    /// Failed checks, in the order they were found
    pub failures: Vec<String>,
}

impl CertValidation {
    fn fail(&mut self, reason: String) {
        self.valid = false;
        self.failures.push(reason);
    }
}

impl CertificateStore {
    /// Returns true if the `source` copy of `name` has expired
    pub fn is_expired(&self, name: &str, source: CertSource) -> Result<bool> {
        let expired = self.record(name, source)?.is_expired_at(Utc::now());
        trace!(certificate = name, source = %source, expired, "expiration check");
        Ok(expired)
    }

    /// Returns true if the `source` copy of `name` expires within `days`
    pub fn is_close_to_expiration(&self, name: &str, source: CertSource, days: i64) -> Result<bool> {
        Ok(self
            .record(name, source)?
            .is_close_to_expiration_at(Utc::now(), days))
    }

    /// Returns true if the `source` copy of `name` is not valid yet
    pub fn starts_in_future(&self, name: &str, source: CertSource) -> Result<bool> {
        let future = self.record(name, source)?.starts_in_future_at(Utc::now());
        trace!(certificate = name, source = %source, future, "start date check");
        Ok(future)
    }

    /// Returns true if the `source` copy of `name` was signed by `ca.crt`.
    ///
    /// Both certificates must be in the store.
    pub fn chain_is_valid(&self, name: &str, source: CertSource) -> Result<bool> {
        let ca = self
            .get(CA_CERT, None)
            .ok_or_else(|| BugcheckError::CertificateNotFound {
                name: CA_CERT.to_string(),
            })?;
        let valid = self.record(name, source)?.is_signed_by(ca);
        trace!(certificate = name, source = %source, valid, "chain check");
        Ok(valid)
    }

    /// Returns true if both certificates have the same fingerprint
    pub fn certs_are_similar(
        &self,
        (a_name, a_source): (&str, CertSource),
        (b_name, b_source): (&str, CertSource),
    ) -> Result<bool> {
        let a = self.record(a_name, a_source)?;
        let b = self.record(b_name, b_source)?;
        Ok(a.fingerprint == b.fingerprint)
    }

    /// Validate every copy of `name` as of now
    pub fn validate(&self, name: &str, options: &ValidateOptions) -> Result<CertValidation> {
        self.validate_at(name, options, Utc::now())
    }

    /// Validate every copy of `name` as of `now`.
    ///
    /// An unknown `name`, one with no loaded copy, or a missing `ca.crt` when the chain is checked,
    /// is an error rather than a failed validation.
    pub fn validate_at(&self, name: &str, options: &ValidateOptions, now: DateTime<Utc>) -> Result<CertValidation> {
        let sources = self
            .sources(name)
            .filter(|sources| !sources.is_empty())
            .ok_or_else(|| BugcheckError::CertificateNotFound {
                name: name.to_string(),
            })?;
        let ca = if options.chain {
            Some(
                self.get(CA_CERT, None)
                    .ok_or_else(|| BugcheckError::CertificateNotFound {
                        name: CA_CERT.to_string(),
                    })?,
            )
        } else {
            None
        };

        let mut verdict = CertValidation {
            valid: true,
            failures: Vec::new(),
        };

        for source in &sources {
            let record = self.record(name, *source)?;
            if options.expiration {
                if record.is_expired_at(now) {
                    verdict.fail(format!("expiration date ({source})"));
                } else if record.is_close_to_expiration_at(now, options.warning_days) {
                    verdict.fail(format!("close to expiration ({source})"));
                }
            }
            if options.start_date && record.starts_in_future_at(now) {
                verdict.fail(format!("start date ({source})"));
            }
            if let Some(ca) = ca {
                if !record.is_signed_by(ca) {
                    verdict.fail(format!("invalid chain ({source})"));
                }
            }
        }

        if options.sources {
            if let [first, second] = sources.as_slice() {
                if !self.certs_are_similar((name, *first), (name, *second))? {
                    verdict.fail("k8s secret and cert file contents are different".to_string());
                }
            }
        }

        debug!(certificate = name, valid = verdict.valid, failures = ?verdict.failures, "certificate validation");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertificateRecord;
    use chrono::Duration;

    const CA: &str = include_str!("testdata/ca.pem");
    const SERVER: &str = include_str!("testdata/server.pem");
    const ROGUE: &str = include_str!("testdata/rogue_signed.pem");

    /// Record valid over `[now + from_days, now + to_days]`
    fn synthetic(now: DateTime<Utc>, from_days: i64, to_days: i64, tag: &[u8]) -> CertificateRecord {
        CertificateRecord::from_parts(now + Duration::days(from_days), now + Duration::days(to_days), tag.to_vec())
    }

    fn no_chain() -> ValidateOptions {
        ValidateOptions {
            chain: false,
            ..ValidateOptions::default()
        }
    }

    #[test]
    fn valid_certificate_has_no_failures() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, synthetic(now, -10, 100, b"cvp"));

        let verdict = store.validate_at("cvp.crt", &no_chain(), now).unwrap();
        assert!(verdict.valid);
        assert!(verdict.failures.is_empty());
    }

    #[test]
    fn warning_window_before_expiry() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, synthetic(now, -10, 100, b"cvp"));

        let verdict = store
            .validate_at("cvp.crt", &no_chain(), now + Duration::days(95))
            .unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.failures, vec!["close to expiration (filesystem)"]);
    }

    #[test]
    fn expired_and_future_certificates() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("old.crt", CertSource::Kubernetes, synthetic(now, -400, -35, b"old"));
        store.insert("new.crt", CertSource::Filesystem, synthetic(now, 2, 300, b"new"));

        let old = store.validate_at("old.crt", &no_chain(), now).unwrap();
        assert_eq!(old.failures, vec!["expiration date (k8s)"]);
        let new = store.validate_at("new.crt", &no_chain(), now).unwrap();
        assert_eq!(new.failures, vec!["start date (filesystem)"]);
    }

    #[test]
    fn differing_sources_fail_even_when_time_valid() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, synthetic(now, -10, 100, b"on disk"));
        store.insert("cvp.crt", CertSource::Kubernetes, synthetic(now, -10, 100, b"in secret"));

        let verdict = store.validate_at("cvp.crt", &no_chain(), now).unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.failures, vec!["k8s secret and cert file contents are different"]);

        let lenient = ValidateOptions {
            sources: false,
            ..no_chain()
        };
        assert!(store.validate_at("cvp.crt", &lenient, now).unwrap().valid);
    }

    #[test]
    fn unknown_certificate_is_an_error() {
        let store = CertificateStore::new();
        assert!(matches!(
            store.validate("missing.crt", &no_chain()),
            Err(BugcheckError::CertificateNotFound { .. })
        ));
    }

    #[test]
    fn certificate_without_copies_is_an_error() {
        let mut store = CertificateStore::new();
        store.declare("broken.pem");
        assert!(matches!(
            store.validate("broken.pem", &no_chain()),
            Err(BugcheckError::CertificateNotFound { .. })
        ));
    }

    #[test]
    fn chain_requires_ca() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("cvp.crt", CertSource::Filesystem, synthetic(now, -10, 100, b"cvp"));

        let err = store
            .validate_at("cvp.crt", &ValidateOptions::default(), now)
            .unwrap_err();
        assert!(matches!(err, BugcheckError::CertificateNotFound { name } if name == CA_CERT));
        assert!(store.chain_is_valid("cvp.crt", CertSource::Filesystem).is_err());
    }

    #[test]
    fn chain_validation_with_real_certificates() {
        let mut store = CertificateStore::new();
        let ca = CertificateRecord::from_pem("ca.crt", CA.as_bytes()).unwrap();
        let now = ca.not_before + Duration::days(1);
        store.insert("ca.crt", CertSource::Filesystem, ca);
        store.insert(
            "server.crt",
            CertSource::Filesystem,
            CertificateRecord::from_pem("server.crt", SERVER.as_bytes()).unwrap(),
        );
        store.insert(
            "other.crt",
            CertSource::Kubernetes,
            CertificateRecord::from_pem("other.crt", ROGUE.as_bytes()).unwrap(),
        );

        let options = ValidateOptions::default();
        assert!(store.validate_at("server.crt", &options, now).unwrap().valid);
        assert!(store.validate_at("ca.crt", &options, now).unwrap().valid);

        let rogue = store.validate_at("other.crt", &options, now).unwrap();
        assert_eq!(rogue.failures, vec!["invalid chain (k8s)"]);
        assert!(!store.chain_is_valid("other.crt", CertSource::Kubernetes).unwrap());
    }

    #[test]
    fn similarity_across_names() {
        let now = Utc::now();
        let mut store = CertificateStore::new();
        store.insert("a.crt", CertSource::Filesystem, synthetic(now, -1, 10, b"same"));
        store.insert("b.crt", CertSource::Kubernetes, synthetic(now, -1, 10, b"same"));

        assert!(store
            .certs_are_similar(("a.crt", CertSource::Filesystem), ("b.crt", CertSource::Kubernetes))
            .unwrap());
        assert!(store
            .certs_are_similar(("a.crt", CertSource::Kubernetes), ("b.crt", CertSource::Kubernetes))
            .is_err());
    }
}
