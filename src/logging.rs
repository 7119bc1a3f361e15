//! Logging setup: stderr plus the run's orchestrator.log
//!
//! Stderr level is gated by `--verbose`; the file layer always records debug
//! so a run directory is self-contained evidence of what happened.

use eyre::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing. `log_file` is created (with parents) when given.
pub fn init(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open log file")?;

            let file_layer = fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));

            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| eyre::eyre!("Failed to initialize logging: {}", e))?;
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .try_init()
                .map_err(|e| eyre::eyre!("Failed to initialize logging: {}", e))?;
        }
    }

    Ok(())
}
