//! Top-level error type. Library crates return their own `thiserror` enums;
//! this binary wraps each with `#[from]` so `?` composes across the whole
//! process and `main` can map any of them to a concrete exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("missing required configuration: {0}")]
    MissingRequiredConfig(&'static str),

    #[error("failed to read config file {path}: {source}")]
    ConfigFileRead { path: String, source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    ConfigFileParse { path: String, source: toml::de::Error },

    #[error(transparent)]
    Sip(#[from] sip_message::SipParseError),

    #[error(transparent)]
    Transaction(#[from] sip_transaction::TransactionError),

    #[error(transparent)]
    Session(#[from] call_session::SessionError),

    #[error(transparent)]
    AiRealtime(#[from] ai_realtime::AiRealtimeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process exit codes (§6).
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Normal = 0,
    ConfigError = 1,
    SocketFailure = 2,
    Interrupted = 130,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
