//! Tracing subscriber setup for the cron binary.
//!
//! Filter priority, highest first: `THESAURUS_SYNC_LOG`, `RUST_LOG`, then the
//! configured `logging.level`. Lines always go to the log file; stdout is
//! dropped with `--quiet`.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Project specific filter variable
pub const LOG_ENV_VAR: &str = "THESAURUS_SYNC_LOG";

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub quiet: bool,
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingOptions {
    #[inline]
    fn default() -> Self {
        Self {
            quiet: false,
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed or the
/// log file cannot be opened.
#[inline]
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let filter = build_env_filter(&options.level);

    let stdout_layer = (!options.quiet).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
    });

    let file_layer = match options.file.as_ref() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Build the filter from the environment, falling back to `default_level`
#[inline]
pub fn build_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV_VAR) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
}
