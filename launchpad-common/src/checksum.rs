use crate::error::CommonError;
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Verify that `bytes` digests to `expected` (hex, case-insensitive).
/// An optional `sha256:` prefix on the expected value is accepted.
pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<(), CommonError> {
    let expected = expected
        .strip_prefix("sha256:")
        .unwrap_or(expected)
        .to_lowercase();
    let actual = sha256_hex(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(
            sha256_hex(b"launchpad"),
            sha256_hex(b"launchpad"),
        );
        assert_eq!(sha256_hex(b"launchpad").len(), 64);
    }

    #[test]
    fn verify_accepts_prefixed_and_uppercase() {
        let digest = sha256_hex(b"data");
        verify_sha256(b"data", &digest).unwrap();
        verify_sha256(b"data", &format!("sha256:{digest}")).unwrap();
        verify_sha256(b"data", &digest.to_uppercase()).unwrap();
    }

    #[test]
    fn verify_rejects_mismatch() {
        let err = verify_sha256(b"data", &sha256_hex(b"other")).unwrap_err();
        assert!(matches!(err, CommonError::ChecksumMismatch { .. }));
    }
}
