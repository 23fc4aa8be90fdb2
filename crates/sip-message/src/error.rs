//! Error type for SIP message parsing.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SipParseError {
    #[error("empty datagram")]
    Empty,

    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Content-Length ({declared}) does not match body length ({actual})")]
    ContentLengthMismatch { declared: usize, actual: usize },

    #[error("malformed header line: {0}")]
    MalformedHeader(String),
}
