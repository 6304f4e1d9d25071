//! SoundTouch Proxy - serves a web UI and relays it to SoundTouch devices.
//!
//! Without a device address the proxy discovers devices itself (SSDP
//! multicast first, then a subnet scan).

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use soundtouch_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::{split_addresses, ServerConfig};

/// SoundTouch Proxy - discovery and command relay for Bose SoundTouch devices.
#[derive(Parser, Debug)]
#[command(name = "soundtouch-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device IP address(es), comma-separated. Skips discovery when set.
    #[arg(value_name = "DEVICE_IP", env = "SOUNDTOUCH_DEVICE_IP")]
    device_ip: Option<String>,

    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SOUNDTOUCH_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "SOUNDTOUCH_PORT")]
    port: Option<u16>,

    /// Directory of static UI files (overrides config file).
    #[arg(short = 'w', long, env = "SOUNDTOUCH_WEB_ROOT")]
    web_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("SoundTouch Proxy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ips) = args.device_ip.as_deref() {
        let ips = split_addresses(ips);
        if !ips.is_empty() {
            config.device_ips = ips;
        }
    }
    if let Some(web_root) = args.web_root {
        config.web_root = Some(web_root);
    }

    if config.device_ips.is_empty() {
        log::info!(
            "Configuration: bind_port={}, devices=discover",
            config.bind_port
        );
    } else {
        log::info!(
            "Configuration: bind_port={}, devices={}",
            config.bind_port,
            config.device_ips.join(",")
        );
    }

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::from_services(&services, &core_config);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!(
        "Open http://localhost:{}/ in your browser",
        config.bind_port
    );

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, stopping server...");
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
