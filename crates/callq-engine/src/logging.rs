//! Logging setup for binaries and tests embedding the engine.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{AcdError, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to include file and line information
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: Level::INFO, file_info: false }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig { level, ..Default::default() }
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }
}

/// Set up the logging system with the provided configuration.
///
/// `RUST_LOG` directives take precedence over the configured level.
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let subscriber = fmt::Subscriber::builder().with_env_filter(filter);

    let result = if config.file_info {
        subscriber.with_file(true).with_line_number(true).try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| AcdError::configuration(format!("failed to install subscriber: {e}")))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level)
        .map_err(|_| AcdError::configuration(format!("invalid log level: {level}")))
}
