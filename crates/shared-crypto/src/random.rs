//! OS-seeded random material for nonces and identifiers.

use rand::RngCore;

/// Hex string of `n_bytes` random bytes (so `2 * n_bytes` characters).
#[must_use]
pub fn random_hex(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Prefixed random identifier, e.g. `random_id("elicit", 8)` yields
/// `elicit_` plus 16 hex characters.
#[must_use]
pub fn random_id(prefix: &str, n_bytes: usize) -> String {
    format!("{}_{}", prefix, random_hex(n_bytes))
}
