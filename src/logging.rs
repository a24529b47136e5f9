//! Logging initialization.
//!
//! Logs go to a file below the output directory unless stderr logging is
//! requested. Both use a non-blocking writer.

use crate::config::{LogLevel, LoggingConfig};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging based on configuration.
///
/// Returns a guard that must be kept alive for the duration of the program
/// to ensure all logs are flushed.
pub fn init(config: &LoggingConfig, log_file: &Path) -> anyhow::Result<Option<WorkerGuard>> {
    if config.level == LogLevel::Off {
        return Ok(None);
    }

    let (non_blocking, guard) = if config.stderr {
        tracing_appender::non_blocking(std::io::stderr())
    } else {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        tracing_appender::non_blocking(file)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level: tracing::Level = config.level.into();
        EnvFilter::new(level.to_string())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(config.stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    if config.stderr {
        tracing::info!(level = ?config.level, "Logging initialized");
    } else {
        tracing::info!(
            level = ?config.level,
            file = %log_file.display(),
            "Logging initialized"
        );
    }

    Ok(Some(guard))
}
