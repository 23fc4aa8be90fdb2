//! Error type for the call session layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no common codec between offer and local capability")]
    NoCommonCodec,

    #[error("session for Call-ID {0:?} not found")]
    NotFound(String),
}
