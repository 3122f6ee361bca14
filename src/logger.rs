//! Logging via tracing-subscriber.
//!
//! [`build`] returns a subscriber that appends one line per event to the
//! configured log file (parent directories are created, existing content is
//! never truncated) and optionally echoes the same lines to stderr.
//!
//! The subscriber is not installed globally: the session runner scopes it
//! with `tracing::subscriber::with_default`, so each session logs to its own
//! file even when several run in one process.

use std::fs::{self, OpenOptions};
use std::sync::Arc;

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::LoggingConfig;
use crate::error::AppError;

/// Build the session subscriber.
///
/// `settings.level` is already resolved (`-v` flags, `NESTOR_LOG_LEVEL`,
/// `logging.level`) and always wins; `RUST_LOG` only applies when that level
/// cannot be parsed as a filter.
pub fn build(settings: &LoggingConfig) -> Result<impl Subscriber + Send + Sync + 'static, AppError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = env_filter(&settings.level, rust_log.as_deref())?;

    let path = settings.file.as_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Logger(format!("cannot create log directory '{}': {e}", parent.display()))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("failed to open log file '{}': {e}", path.display())))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Arc::new(file));

    let echo_layer = settings
        .echo
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    Ok(Registry::default()
        .with(filter)
        .with(file_layer)
        .with(echo_layer))
}

fn env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    match EnvFilter::try_new(level) {
        Ok(filter) => Ok(filter),
        Err(level_err) => match rust_log {
            Some(directives) => EnvFilter::try_new(directives).map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            }),
            None => Err(AppError::Logger(format!("invalid log level '{level}': {level_err}"))),
        },
    }
}
