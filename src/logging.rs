//! Tracing bootstrap for the refactor loop.
//!
//! # Separation of Concerns
//!
//! - **Stderr layer**: dev diagnostics via `RUST_LOG`, compact format.
//! - **File layer (`refactor.log`)**: operational record of every run,
//!   always written, not part of the engine's contract.
//!
//! The history file (`refactor-history.log`) is product state and is owned
//! by `io::history`, not by this module.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a stderr layer and an append-only file layer.
///
/// Reads `RUST_LOG`; defaults to `info` if unset.
pub fn init(log_path: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
        .init();
    Ok(())
}
