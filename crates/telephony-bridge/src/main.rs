//! Process entry point (§6): parse CLI flags, layer configuration, install
//! logging, and run the bridge until a shutdown signal arrives.

mod app;
mod call_context;
mod config;
mod error;
mod transport;

use clap::Parser;
use infra_common::logging::{setup_logging, LoggingConfig};
use tracing::{error, info, warn};

use crate::app::Application;
use crate::config::{BridgeConfig, CliOverrides};
use crate::error::{BridgeError, ExitCode};

#[derive(Parser, Debug)]
#[command(author, version, about = "SIP-to-realtime-AI telephony bridge", long_about = None)]
struct Args {
    /// Path to a TOML config file, layered over environment variables.
    #[arg(short, long)]
    config: Option<String>,

    /// Local SIP UDP port, overriding SIP_CLIENT_PORT / the config file.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Skip REGISTER against the upstream SIP server (useful for testing
    /// against a direct peer-to-peer UAC).
    #[arg(long)]
    skip_registration: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    setup_logging(LoggingConfig { level, ..LoggingConfig::default() });

    let overrides = CliOverrides {
        sip_client_port: args.port,
        skip_sip_registration: if args.skip_registration { Some(true) } else { None },
    };

    let config = match BridgeConfig::load(args.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::ConfigError.into();
        }
    };

    match run(config).await {
        // `run` only returns `Ok` once a shutdown signal has been handled;
        // the accept loop otherwise runs until the process is killed.
        Ok(()) => ExitCode::Interrupted.into(),
        Err(BridgeError::Io(_)) => ExitCode::SocketFailure.into(),
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::SocketFailure.into()
        }
    }
}

async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let app = Application::new(config).await?;
    info!("telephony bridge started");

    let run_handle = tokio::spawn(app.clone().run());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight calls");

    run_handle.abort();

    // Give BYEs already in flight a chance to land before the process exits;
    // the OS will reclaim the socket regardless once we return.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    info!("telephony bridge stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler, falling back to Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
