//! # HMAC-SHA256 Signatures
//!
//! One-shot signing helpers keyed by a shared secret. The HMAC
//! authenticates (not merely checksums) the signed bytes: only a holder of
//! the secret can produce a verifiable signature.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `data` keyed by `secret`.
#[must_use]
pub fn hmac_sha256(secret: &[u8], data: &[u8]) -> [u8; 32] {
    // Unreachable error arm: HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return [0u8; 32],
    };
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Hex-encoded HMAC-SHA256.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, data))
}

/// Verify an HMAC-SHA256 signature in constant time.
#[must_use]
pub fn verify_hmac_sha256(secret: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let expected = hmac_sha256(secret, data);
    constant_time_eq(&expected, signature)
}

/// Hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Constant-time byte equality.
///
/// Always inspects every byte of the longer input so that timing does not
/// leak the position of the first mismatch.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_deterministic() {
        let a = hmac_sha256(b"secret", b"payload");
        let b = hmac_sha256(b"secret", b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hmac_key_separation() {
        let a = hmac_sha256(b"secret-1", b"payload");
        let b = hmac_sha256(b"secret-2", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_round_trip() {
        let sig = hmac_sha256(b"secret", b"payload");
        assert!(verify_hmac_sha256(b"secret", b"payload", &sig));
        assert!(!verify_hmac_sha256(b"secret", b"tampered", &sig));
        assert!(!verify_hmac_sha256(b"wrong", b"payload", &sig));
    }

    #[test]
    fn test_sha256_hex() {
        // Known digest of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
