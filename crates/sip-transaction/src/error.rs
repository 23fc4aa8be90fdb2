//! Error type for the registration engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transport send failed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("challenge missing a realm or nonce")]
    IncompleteChallenge,

    #[error("registration failed after {retries} retransmissions")]
    RegistrationFailed { retries: u32 },
}
