use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::core::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the tracing subscriber from an explicit logging configuration.
///
/// Installs a console layer filtered by `RUST_LOG` (falling back to the
/// configured level) and, when file logging is enabled, an error-only file
/// layer so every coordinator-level failure ends up in
/// `downloader_errors.log` with timestamp and severity. Idempotent: a second
/// call is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ytde_core={}", config.level)));

    if !config.log_to_file {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }

    let log_dir = match resolve_log_dir(config) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("{err}");
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            return;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {err}");
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, "downloader_errors.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
}

fn resolve_log_dir(config: &LoggingConfig) -> Result<PathBuf, String> {
    if let Some(dir) = &config.log_dir {
        return Ok(dir.clone());
    }

    crate::core::config::AppConfig::logs_dir()
        .map_err(|e| format!("Failed to resolve log directory: {e}"))
}
