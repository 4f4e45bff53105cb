//! # murmur
//!
//! Relay binary: loads settings, installs logging and metrics, and serves the
//! chat relay until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_server::config::ServerConfig;
use murmur_server::server::MurmurServer;
use murmur_server::welcome::SimulatedWelcome;
use murmur_settings::{LogFormat, MurmurSettings};

/// Realtime chat relay over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "murmur", about = "Realtime chat relay over WebSocket")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.murmur/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(val: &str) -> Result<LogFormat, String> {
    LogFormat::parse(val).ok_or_else(|| format!("unknown log format '{val}' (expected pretty or json)"))
}

impl Cli {
    /// Apply CLI flags on top of loaded settings.
    fn apply(&self, settings: &mut MurmurSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(murmur_settings::settings_path);
    let mut settings = murmur_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    murmur_logging::init_subscriber(&settings.logging.level, settings.logging.format)
        .context("Failed to initialize logging")?;

    let metrics = murmur_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let welcome = Arc::new(SimulatedWelcome::from_settings(&settings.welcome));
    let server = MurmurServer::new(ServerConfig::from(&settings.server), welcome, metrics);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!("murmur relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop(handle).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
