//! Error type for the AI realtime client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiRealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("session invalidated by server: {message}")]
    SessionInvalidated { message: String },

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}
