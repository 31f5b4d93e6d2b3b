//! Logging subsystem
//!
//! Structured logging via tracing with JSON (production) and plaintext
//! (development) output formats.
//!
//! # Environment Variables
//!
//! - `TETHER_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogSettings;

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// Write to stdout
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Write to a file at the given path
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Build a LogConfig from the loaded settings.
    pub fn from_settings(settings: &LogSettings) -> Self {
        Self {
            format: if settings.json {
                LogFormat::Json
            } else {
                LogFormat::Plaintext
            },
            output: match settings.file {
                Some(ref path) => LogOutput::File(PathBuf::from(path)),
                None => LogOutput::Stdout,
            },
            default_level: Level::INFO,
        }
    }
}

/// Errors from logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    OpenFile(#[from] io::Error),

    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; subsequent calls return
/// [`LoggingError::AlreadyInitialized`].
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_env("TETHER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let layer = match (&config.format, &config.output) {
        (LogFormat::Json, LogOutput::Stdout) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .boxed(),
        (LogFormat::Json, LogOutput::Stderr) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .boxed(),
        (LogFormat::Json, LogOutput::File(path)) => {
            let file = Arc::new(File::create(path)?);
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file)
                .with_ansi(false)
                .boxed()
        }
        (LogFormat::Plaintext, LogOutput::Stdout) => tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .boxed(),
        (LogFormat::Plaintext, LogOutput::Stderr) => tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .boxed(),
        (LogFormat::Plaintext, LogOutput::File(path)) => {
            let file = Arc::new(File::create(path)?);
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .boxed()
        }
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_from_settings() {
        let plain = LogConfig::from_settings(&LogSettings {
            json: false,
            file: None,
        });
        assert_eq!(plain.format, LogFormat::Plaintext);
        assert_eq!(plain.output, LogOutput::Stdout);

        let json_file = LogConfig::from_settings(&LogSettings {
            json: true,
            file: Some("/tmp/tether.log".into()),
        });
        assert_eq!(json_file.format, LogFormat::Json);
        assert_eq!(
            json_file.output,
            LogOutput::File(PathBuf::from("/tmp/tether.log"))
        );
    }
}
