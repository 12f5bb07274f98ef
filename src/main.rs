//! # Payload Link
//!
//! Onboard link controller for balloon payloads.
//!
//! Answers ground station commands over the command radio, transfers images
//! with checksum verification, relays secondary radio and GPS traffic, and
//! keeps every peripheral running across failures.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use payload_link::camera::StillCamera;
use payload_link::config::Config;
use payload_link::serial::SystemSerial;
use payload_link::supervisor::LinkSupervisor;
use payload_link::telemetry::{MissionStorage, RUNTIME_LOG_FILE};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,
}

/// Main entry point for the payload link controller
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate the configuration
///    - Create the mission folder
///    - Log to stderr and to the runtime log in the mission folder
///
/// 2. **Main Loop**
///    - Acquire whatever peripherals are attached
///    - Run supervisor iterations until Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Stop every peripheral worker
///    - Close the command link
///
/// # Errors
///
/// Returns error if the configuration is invalid or the mission folder
/// cannot be created. Missing hardware is never an error.
///
/// # Examples
///
/// ```bash
/// payload-link --config /etc/payload-link.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let storage = MissionStorage::create(&config.storage.base_dir)
        .context("Failed to create mission folder")?;

    // Runtime log lives in the mission folder so the ground station can fetch it
    let file_appender = tracing_appender::rolling::never(storage.folder(), RUNTIME_LOG_FILE);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!("Payload Link v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Mission folder: {}", storage.folder().display());

    let camera = StillCamera::from(&config.camera);
    let mut supervisor = LinkSupervisor::new(config, Arc::new(SystemSerial), Arc::new(camera), storage);
    supervisor.start().await;

    info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = supervisor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    supervisor.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["payload-link"]);
        assert_eq!(args.config, PathBuf::from("config/default.toml"));
    }

    #[test]
    fn test_config_flag() {
        let args = Args::parse_from(["payload-link", "--config", "/tmp/flight.toml"]);
        assert_eq!(args.config, PathBuf::from("/tmp/flight.toml"));
    }

    #[test]
    fn test_args_are_well_formed() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
