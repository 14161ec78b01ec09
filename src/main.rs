//! opendocs-bridge - stdio front end for the editor's MCP WebSocket server.
//!
//! Reads MCP traffic on stdin, answers the handshake locally, forwards tool
//! calls to the backend and writes responses to stdout in the framing the
//! client used. Diagnostics go to stderr and the log file only.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opendocs_bridge::app::App;
use opendocs_bridge::config::BridgeConfig;
use opendocs_bridge::transport::FramingError;

/// Open the diagnostic log file in append mode, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Install the tracing subscriber: stderr always, plus the log file if it
/// could be opened.
fn init_logging(config: &BridgeConfig) {
    let (log_file, log_error) = match config.log_file.as_deref().map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "opendocs_bridge=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    if let Some(e) = log_error {
        tracing::warn!("File logging disabled: {:#}", e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    init_logging(&config);
    tracing::info!("Starting opendocs-bridge v{}", env!("CARGO_PKG_VERSION"));

    let result = App::new(config.backend_url, std::io::stdout())
        .run(tokio::io::stdin())
        .await;

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            if let Some(framing) = e.downcast_ref::<FramingError>() {
                tracing::error!("Invalid MCP header: {}", framing);
                eprintln!("Invalid MCP header: {}", framing);
            } else {
                tracing::error!("Bridge error: {:#}", e);
                eprintln!("Error: {:#}", e);
            }
            1
        }
    };

    tracing::info!("exit {}", code);
    // Exit directly: the blocking stdin reader would otherwise hold up
    // runtime shutdown.
    std::process::exit(code);
}
