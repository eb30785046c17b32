//! Logging system configuration and initialization
//!
//! This module provides the tracing setup:
//! - EnvFilter-based level control with noisy dependencies suppressed
//! - Console output and optional non-blocking file output
//! - Log files stored relative to the executable location
//! - RUST_LOG overrides the configured level when set

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export LoggingSettings from the config module
pub use crate::infrastructure::config::LoggingSettings;

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Get the log directory relative to the executable location
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    let config = LoggingSettings::default();
    init_logging_with_config(&config)
}

/// Initialize logging with custom configuration
///
/// Noisy dependency targets (sqlx queries, HTTP internals) are suppressed
/// unless the `RUST_LOG` environment variable overrides the filter:
///
/// ```bash
/// # Show all SQL queries even on INFO level
/// RUST_LOG="info,sqlx::query=debug" cargo run
/// ```
pub fn init_logging_with_config(config: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},sqlx=warn,reqwest=warn,hyper=warn",
            level = config.level
        ))
    });

    let console_layer = config.console_output.then(fmt::layer);

    let file_layer = if config.file_output {
        let log_dir = get_log_directory();
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory: {e}"))?;

        let appender = tracing_appender::rolling::daily(&log_dir, "review-sentinel.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard mutex poisoned"))?
            .push(guard);

        Some(fmt::layer().with_ansi(false).with_writer(writer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    tracing::info!(
        "Logging initialized (level: {}, file output: {})",
        config.level,
        config.file_output
    );
    Ok(())
}
