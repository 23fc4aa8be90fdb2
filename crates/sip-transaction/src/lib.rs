//! SIP registration engine: digest authentication, Timer A retransmission,
//! NAT keep-alive, self-liveness reporting, and out-of-dialog responder.

pub mod digest;
pub mod error;
pub mod keepalive;
pub mod register;
pub mod responder;
pub mod transport;

pub use error::TransactionError;
pub use keepalive::KeepAlive;
pub use register::{RegistrationClient, RegistrationConfig, RegistrationState};
pub use transport::SipTransport;
