//! Structured logging setup, matching the `tracing` + `EnvFilter` pattern
//! used throughout the upstream stack (`RUST_LOG`-driven, span-aware).

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is unset.
    pub level: Level,
    /// Emit JSON-formatted log lines instead of the human-readable format.
    pub json: bool,
    /// Include file/line information in each log line.
    pub file_info: bool,
    /// Log span enter/exit events (useful for tracing per-call spans).
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global `tracing` subscriber. Call once at process start.
pub fn setup_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Parse a log level from a string (e.g. from config), for validation before
/// `RUST_LOG` takes over.
pub fn parse_log_level(level: &str) -> Option<Level> {
    Level::from_str(level).ok()
}

/// Span every log line for one call should be nested under, so concurrent
/// calls can be filtered by `call_id` (`RUST_LOG` target filtering or a
/// `grep`-friendly field).
pub fn call_span(call_id: &str) -> tracing::Span {
    tracing::info_span!("call", call_id = %call_id)
}
