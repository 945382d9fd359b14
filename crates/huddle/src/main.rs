//! # huddle
//!
//! Huddle server binary: loads settings, installs logging and metrics, and
//! serves the presence and thread-exchange protocol until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_server::config::ServerConfig;
use huddle_server::server::HuddleServer;
use huddle_settings::HuddleSettings;

/// How long open sessions get to wind down after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Huddle collaboration server.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Shares background-agent activity between collaborators")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.huddle/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<HuddleSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(huddle_settings::settings_path);
        huddle_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    fn server_config(&self, settings: &HuddleSettings) -> ServerConfig {
        let mut config = ServerConfig::from_settings(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(settings.logging.level.as_str());
    huddle_core::logging::init_subscriber(level, settings.logging.json);

    let metrics = huddle_server::metrics::install_recorder();
    let server = HuddleServer::new(args.server_config(&settings)).with_metrics(metrics);
    let method_count = server.registry().methods().len();

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("huddle listening on ws://{addr}/ws ({method_count} RPC methods registered)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!("shutdown complete");
    Ok(())
}
