//! Parsed certificate records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use x509_parser::prelude::{FromDer, X509Certificate};

use bugcheck_core::{BugcheckError, Result};

use crate::hash::sha256_bytes;

/// One certificate loaded from one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// SHA-256 of the DER encoding, lowercase hex
    pub fingerprint: String,
    /// DER encoding
    pub der: Vec<u8>,
}

impl CertificateRecord {
    /// Load the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(name: &str, contents: &[u8]) -> Result<Self> {
        let pems = pem::parse_many(contents).map_err(|e| parse_error(name, e))?;
        let block = pems
            .into_iter()
            .find(|p| p.tag() == "CERTIFICATE")
            .ok_or_else(|| parse_error(name, "no CERTIFICATE block"))?;
        Self::from_der(name, block.into_contents())
    }

    /// Load a DER-encoded certificate
    pub fn from_der(name: &str, der: Vec<u8>) -> Result<Self> {
        let (not_before, not_after) = {
            let (_, cert) = X509Certificate::from_der(&der).map_err(|e| parse_error(name, e))?;
            (
                asn1_to_utc(cert.validity().not_before),
                asn1_to_utc(cert.validity().not_after),
            )
        };
        Ok(Self::from_parts(not_before, not_after, der))
    }

    /// Build a record from already-known validity dates
    #[must_use]
    pub fn from_parts(not_before: DateTime<Utc>, not_after: DateTime<Utc>, der: Vec<u8>) -> Self {
        Self {
            not_before,
            not_after,
            fingerprint: sha256_bytes(&der),
            der,
        }
    }

    /// True once `now` is past the end of the validity window
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_after
    }

    /// True when `now` is within `days` of the end of the validity window
    /// (an expired certificate is also close to expiration)
    #[must_use]
    pub fn is_close_to_expiration_at(&self, now: DateTime<Utc>, days: i64) -> bool {
        now >= self.not_after - Duration::days(days)
    }

    /// True while `now` is before the start of the validity window
    #[must_use]
    pub fn starts_in_future_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.not_before
    }

    /// Check that this certificate was issued and signed by `ca`
    #[must_use]
    pub fn is_signed_by(&self, ca: &Self) -> bool {
        let (Ok((_, cert)), Ok((_, issuer))) = (
            X509Certificate::from_der(&self.der),
            X509Certificate::from_der(&ca.der),
        ) else {
            return false;
        };
        cert.issuer().as_raw() == issuer.subject().as_raw()
            && cert.verify_signature(Some(issuer.public_key())).is_ok()
    }
}

fn parse_error(name: &str, reason: impl std::fmt::Display) -> BugcheckError {
    BugcheckError::CertificateParse {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = include_str!("testdata/ca.pem");
    const SERVER: &str = include_str!("testdata/server.pem");
    const ROGUE: &str = include_str!("testdata/rogue_signed.pem");

    #[test]
    fn parses_validity_and_fingerprint() {
        let record = CertificateRecord::from_pem("server.crt", SERVER.as_bytes()).unwrap();
        assert_eq!(record.not_before.to_rfc3339(), "2026-10-16T18:50:00+00:00");
        assert_eq!(record.not_after.to_rfc3339(), "2125-05-10T18:50:00+00:00");
        assert_eq!(record.fingerprint.len(), 64);
        assert_eq!(record.fingerprint, sha256_bytes(&record.der));
    }

    #[test]
    fn rejects_garbage() {
        let err = CertificateRecord::from_pem("bad.crt", b"not a certificate").unwrap_err();
        assert!(matches!(err, BugcheckError::CertificateParse { .. }));
    }

    #[test]
    fn window_predicates() {
        let now = Utc::now();
        let record = CertificateRecord::from_parts(now - Duration::days(10), now + Duration::days(100), b"x".to_vec());
        assert!(!record.is_expired_at(now));
        assert!(!record.is_close_to_expiration_at(now, 30));
        assert!(!record.starts_in_future_at(now));

        let later = now + Duration::days(95);
        assert!(record.is_close_to_expiration_at(later, 30));
        assert!(!record.is_expired_at(later));
        assert!(record.is_expired_at(now + Duration::days(101)));
        assert!(record.starts_in_future_at(now - Duration::days(11)));
    }

    #[test]
    fn signature_chain() {
        let ca = CertificateRecord::from_pem("ca.crt", CA.as_bytes()).unwrap();
        let server = CertificateRecord::from_pem("server.crt", SERVER.as_bytes()).unwrap();
        let rogue = CertificateRecord::from_pem("other.crt", ROGUE.as_bytes()).unwrap();

        assert!(server.is_signed_by(&ca));
        assert!(ca.is_signed_by(&ca));
        assert!(!rogue.is_signed_by(&ca));
    }
}
