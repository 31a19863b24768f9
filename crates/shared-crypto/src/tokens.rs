//! # Authentication Tokens
//!
//! Three token shapes, all HMAC-SHA256 based:
//!
//! - **Agent token** `"{unix_ts}:{hex_hmac}"` over `"{agent_id}:{unix_ts}"`,
//!   accepted within a ±5 minute window.
//! - **Session token** `"{session_id}:{agent_id}:{issued_ts}:{hex_hmac}"`
//!   binding a session to an agent.
//! - **Auth challenge** hex HMAC over `"{agent_id}:{unix_minute}"`, used by
//!   expert registration.

use crate::errors::CryptoError;
use crate::signatures::{constant_time_eq, hmac_sha256_hex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Accepted clock skew for agent tokens, in seconds.
pub const TOKEN_SKEW_SECS: u64 = 300;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mint an agent token for the current time.
#[must_use]
pub fn create_agent_token(secret: &[u8], agent_id: &str) -> String {
    create_agent_token_at(secret, agent_id, unix_now())
}

/// Mint an agent token for an explicit timestamp.
#[must_use]
pub fn create_agent_token_at(secret: &[u8], agent_id: &str, unix_ts: u64) -> String {
    let signature = hmac_sha256_hex(secret, format!("{agent_id}:{unix_ts}").as_bytes());
    format!("{unix_ts}:{signature}")
}

/// Verify an agent token against the current time.
///
/// # Errors
///
/// - `InvalidTokenFormat` when the token is not `"{ts}:{hex}"`.
/// - `TokenExpired` when the timestamp is outside the skew window.
/// - `InvalidSignature` when the HMAC does not match.
pub fn verify_agent_token(secret: &[u8], agent_id: &str, token: &str) -> Result<(), CryptoError> {
    verify_agent_token_at(secret, agent_id, token, unix_now())
}

/// Verify an agent token against an explicit current time.
///
/// # Errors
///
/// See [`verify_agent_token`].
pub fn verify_agent_token_at(
    secret: &[u8],
    agent_id: &str,
    token: &str,
    now: u64,
) -> Result<(), CryptoError> {
    let (ts_part, hmac_part) = token
        .split_once(':')
        .ok_or(CryptoError::InvalidTokenFormat)?;
    let unix_ts: u64 = ts_part
        .parse()
        .map_err(|_| CryptoError::InvalidTokenFormat)?;

    let age = now.abs_diff(unix_ts);
    if age > TOKEN_SKEW_SECS {
        return Err(CryptoError::TokenExpired {
            age_secs: age,
            window_secs: TOKEN_SKEW_SECS,
        });
    }

    let expected = hmac_sha256_hex(secret, format!("{agent_id}:{unix_ts}").as_bytes());
    if !constant_time_eq(expected.as_bytes(), hmac_part.as_bytes()) {
        return Err(CryptoError::InvalidSignature);
    }

    Ok(())
}

/// Parsed fields of a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenParts {
    pub session_id: String,
    pub agent_id: String,
    pub issued_ts: u64,
    pub hmac_hex: String,
}

/// Mint a session token binding `session_id` to `agent_id`.
#[must_use]
pub fn mint_session_token(
    secret: &[u8],
    session_id: &str,
    agent_id: &str,
    issued_ts: u64,
) -> String {
    let message = format!("{session_id}:{agent_id}:{issued_ts}");
    let signature = hmac_sha256_hex(secret, message.as_bytes());
    format!("{message}:{signature}")
}

/// Parse a session token into its fields without verifying it.
///
/// # Errors
///
/// Returns `InvalidTokenFormat` when the token does not have four
/// colon-separated fields with a numeric timestamp.
pub fn parse_session_token(token: &str) -> Result<SessionTokenParts, CryptoError> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 4 {
        return Err(CryptoError::InvalidTokenFormat);
    }

    let issued_ts: u64 = parts[2]
        .parse()
        .map_err(|_| CryptoError::InvalidTokenFormat)?;

    Ok(SessionTokenParts {
        session_id: parts[0].to_string(),
        agent_id: parts[1].to_string(),
        issued_ts,
        hmac_hex: parts[3].to_string(),
    })
}

/// Verify a session token: HMAC recomputed in constant time, agent binding
/// enforced.
///
/// # Errors
///
/// - `InvalidTokenFormat` when parsing fails.
/// - `AgentMismatch` when the token names a different agent.
/// - `InvalidSignature` when the HMAC does not match.
pub fn verify_session_token(
    secret: &[u8],
    token: &str,
    agent_id: &str,
) -> Result<SessionTokenParts, CryptoError> {
    let parts = parse_session_token(token)?;

    let message = format!(
        "{}:{}:{}",
        parts.session_id, parts.agent_id, parts.issued_ts
    );
    let expected = hmac_sha256_hex(secret, message.as_bytes());
    if !constant_time_eq(expected.as_bytes(), parts.hmac_hex.as_bytes()) {
        return Err(CryptoError::InvalidSignature);
    }

    if parts.agent_id != agent_id {
        return Err(CryptoError::AgentMismatch {
            expected: parts.agent_id.clone(),
            actual: agent_id.to_string(),
        });
    }

    Ok(parts)
}

/// Authentication challenge for expert registration: HMAC over
/// `"{agent_id}:{unix_minute}"`.
#[must_use]
pub fn auth_challenge(secret: &[u8], agent_id: &str, unix_minute: u64) -> String {
    hmac_sha256_hex(secret, format!("{agent_id}:{unix_minute}").as_bytes())
}
