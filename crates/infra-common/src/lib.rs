//! Shared infrastructure for the telephony bridge: a named, cancel-on-reset
//! timer registry, SIP/RTP identifier generators, a bounded drop-oldest
//! queue, structured logging setup, and the cross-cutting config error type.
//!
//! Nothing here is process-global: a [`timer::TimerRegistry`] is owned by
//! whichever component can legitimately cancel its timers (the registration
//! engine, or one call session), per the scoping rule in the design notes.

pub mod errors;
pub mod ids;
pub mod logging;
pub mod queue;
pub mod timer;

pub use errors::ConfigError;
pub use queue::DropOldestQueue;
pub use timer::TimerRegistry;
