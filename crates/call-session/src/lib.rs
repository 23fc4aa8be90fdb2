//! Call session state machine: INVITE handling, BYE disposition, codec
//! negotiation, and Call-ID indexed session storage.

pub mod codec;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod state;

pub use codec::negotiate_codec;
pub use config::SessionConfig;
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{Action, Event, InviteInfo, Session};
pub use state::SessionState;
