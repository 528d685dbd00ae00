//! Log file setup
//!
//! The TUI owns the terminal, so all tracing output goes to a file.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter (e.g. "debug" or "session_launcher=trace")
pub const LOG_ENV: &str = "SESSION_LAUNCHER_LOG";

/// Install the global subscriber writing to `log_path`
pub fn init(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore the error if a subscriber is already installed (tests, repeated init)
    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file))
        .try_init();

    tracing::info!(path = %log_path.display(), "logging initialized");
    Ok(())
}
