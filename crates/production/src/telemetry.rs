//! Logging setup.

use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Errors from logging initialisation.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log file path: {0}")]
    InvalidPath(PathBuf),

    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

/// How the process logs.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset (e.g. `info`, `taler_echo=debug`).
    pub level: String,
    /// Write to this file instead of stdout.
    pub logfile: Option<PathBuf>,
    /// Install no subscriber at all.
    pub silent: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logfile: None,
            silent: false,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    if config.silent {
        return Ok(None);
    }

    let builder = tracing_subscriber::fmt();

    match &config.logfile {
        Some(log_file) => {
            let file_name = log_file
                .file_name()
                .ok_or_else(|| TelemetryError::InvalidPath(log_file.clone()))?
                .to_os_string();
            let directory = match log_file.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    fs::create_dir_all(parent)?;
                    parent.to_path_buf()
                }
                _ => PathBuf::from("."),
            };

            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            builder
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(config.filter())
                .try_init()
                .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            builder
                .with_env_filter(config.filter())
                .try_init()
                .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_installs_nothing() {
        let config = LoggingConfig {
            silent: true,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).unwrap().is_none());
    }

    #[test]
    fn test_logfile_without_name_is_rejected() {
        let config = LoggingConfig {
            logfile: Some(PathBuf::from("/")),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::InvalidPath(_))
        ));
    }
}
