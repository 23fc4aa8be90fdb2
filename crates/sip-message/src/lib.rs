//! SIP message parsing, typed header accessors, SDP offer/answer parsing,
//! and response emission.

pub mod error;
pub mod headers;
pub mod message;
pub mod sdp;

pub use error::SipParseError;
pub use headers::{CSeq, DigestChallenge, HeaderMap, Via};
pub use message::{build_bye_request, build_reinvite_request, build_response, SipMessage, StartLine};
pub use sdp::{MediaDescription, RtpMap, SessionDescription};
