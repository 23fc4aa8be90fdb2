//! Realtime AI WebSocket client: session handshake, audio egress gating,
//! server-event dispatch, and reconnection with exponential backoff.

pub mod backoff;
pub mod client;
pub mod config;
pub mod egress;
pub mod error;
pub mod messages;

pub use client::{AiEvent, AiRealtimeClient};
pub use config::{AiSessionConfig, AudioFormat, FunctionTool, TurnDetectionConfig};
pub use egress::AudioEgressQueue;
pub use error::AiRealtimeError;
pub use messages::ServerEvent;
