//! # Integration Tests Crate
//!
//! Cross-crate tests that drive the elicitation core end-to-end: the
//! event store, the elicitation manager, session security, and expert
//! coordination working together.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! ├── src/
//! │   ├── lib.rs        # This file, plus the shared harness
//! │   ├── scenarios.rs  # Literal end-to-end scenarios (S1-S6)
//! │   └── properties.rs # Quantified invariants and boundary behaviors
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod harness;

#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;
