//! Payload integrity digests

use sha2::{Digest, Sha256};

/// Result of checking a received payload against the digest in its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// Digest present and matching
    Verified,
    /// Digest present but different from the payload's
    Mismatch { expected: String, actual: String },
    /// No digest was sent, nothing checked
    Unchecked,
}

impl Integrity {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Integrity::Mismatch { .. })
    }
}

/// SHA-256 of `data` as 64 lowercase hex characters
pub fn sha256_hex(data: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(data);
    hex::encode(h.finalize())
}

/// Case-sensitive digest comparison
pub fn digests_match(a: &str, b: &str) -> bool {
    a == b
}

/// Check `payload` against an optional expected digest
pub fn verify(payload: &[u8], expected: Option<&str>) -> Integrity {
    let Some(expected) = expected else {
        return Integrity::Unchecked;
    };
    let actual = sha256_hex(payload);
    if digests_match(expected, &actual) {
        Integrity::Verified
    } else {
        Integrity::Mismatch {
            expected: expected.to_string(),
            actual,
        }
    }
}
