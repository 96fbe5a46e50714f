//! SHA-256 fingerprints via `ring::digest`.

use ring::digest::SHA256;

/// Compute the SHA-256 fingerprint of raw bytes (certificate DER data).
///
/// Returns lowercase hex-encoded digest.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    let digest = ring::digest::digest(&SHA256, data);
    hex::encode(digest.as_ref())
}
