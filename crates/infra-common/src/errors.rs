//! Shared error plumbing used across the telephony bridge's crates.
//!
//! Each crate defines its own `thiserror`-derived error enum for its own
//! domain (`SipParseError`, `TransactionError`, `SessionError`, ...); this
//! module holds only the cross-cutting configuration error, which every
//! crate's startup path can produce.

use thiserror::Error;

/// Errors raised while loading or validating process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
