//! Termsession Library
//!
//! A shell session controller that serves a small command-history protocol
//! to an interactive shell over a duplex channel, backed by a history store
//! shared across sessions.

pub mod channel;
pub mod cli;
pub mod config;
pub mod history;
pub mod keys;
pub mod protocol;
pub mod session;
pub mod waiter;

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing subscriber for logging
///
/// Logs go to stderr and, when `log_file` is non-empty, to that file as
/// well. The returned guard flushes the file writer and must be kept alive.
pub fn init_logging(level: &str, log_file: &str) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let (file_layer, guard) = if log_file.trim().is_empty() {
        (None, None)
    } else {
        let path = Path::new(log_file);
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("Log file path has no file name: {}", log_file))?;
        std::fs::create_dir_all(directory).with_context(|| {
            format!("Failed to create log directory: {}", directory.display())
        })?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("termsession={}", level).into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
