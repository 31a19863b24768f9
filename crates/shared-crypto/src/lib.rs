//! # Shared Crypto - HMAC Authentication Primitives
//!
//! Signing and token primitives used across the bridge:
//!
//! - HMAC-SHA256 signatures over canonical bytes (record authentication,
//!   request/response signatures)
//! - Timestamped agent tokens (`"{unix_ts}:{hex_hmac}"`, ±5 minute window)
//! - Session tokens (`"{session_id}:{agent_id}:{issued_ts}:{hmac}"`)
//! - Minute-bucket authentication challenges for expert registration
//! - OS-seeded random nonces and identifiers
//!
//! ## Security
//!
//! Signatures authorize, they do not encrypt. All comparisons of secret
//! material are constant-time.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod errors;
pub mod random;
pub mod signatures;
pub mod tokens;

// Re-export main types
pub use errors::CryptoError;
pub use random::{random_hex, random_id};
pub use signatures::{
    constant_time_eq, hmac_sha256, hmac_sha256_hex, sha256_hex, verify_hmac_sha256,
};
pub use tokens::{
    auth_challenge, create_agent_token, mint_session_token, parse_session_token, unix_now,
    verify_agent_token, verify_session_token, SessionTokenParts, TOKEN_SKEW_SECS,
};
