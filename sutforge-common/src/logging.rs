//! Logging bootstrap shared by the binary and long-running harness hosts.

use crate::casts::LogLevel;
use crate::config::EnvParser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format of the console layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Log file path has no file name: {0}")]
    InvalidFile(PathBuf),

    #[error("Global subscriber already installed")]
    AlreadyInitialized,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `sutforge=debug,info`.
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl LogConfig {
    /// Read `SUTFORGE_LOG_LEVEL`, `SUTFORGE_LOG_FORMAT` and
    /// `SUTFORGE_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let parser = EnvParser::new();
        let level = parser.get_string("LOG_LEVEL", default_level).value;
        let format = parser
            .get_optional_string("LOG_FORMAT")
            .value
            .and_then(|f| f.parse().ok())
            .unwrap_or_default();
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);
        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Use a settings-derived verbosity as the level.
    #[must_use]
    pub fn with_verbosity(self, level: LogLevel) -> Self {
        self.with_level(level.as_filter_directive())
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Guards that flush non-blocking writers on drop. Hold them for the life
/// of the process.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if config.stderr {
        layers.push(console_layer(config.format));
    }

    if let Some(path) = &config.file {
        let file_name = path
            .file_name()
            .ok_or_else(|| LoggingError::InvalidFile(path.clone()))?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guards.push(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    #[test]
    fn test_from_env_defaults_and_overrides() {
        let _guard = env_test_lock();
        // SAFETY: Tests are serialized via env_test_lock
        unsafe {
            std::env::remove_var("SUTFORGE_LOG_LEVEL");
            std::env::set_var("SUTFORGE_LOG_FORMAT", "json");
            std::env::remove_var("SUTFORGE_LOG_FILE");
        }

        let config = LogConfig::from_env("warn");
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none());
        assert!(!config.stderr);

        // SAFETY: Tests are serialized via env_test_lock
        unsafe { std::env::remove_var("SUTFORGE_LOG_FORMAT") };
    }

    #[test]
    fn test_builders() {
        let config = LogConfig {
            level: "info".into(),
            format: LogFormat::Pretty,
            file: None,
            stderr: false,
        }
        .with_stderr()
        .with_verbosity(LogLevel::Critical)
        .with_file("/tmp/sutforge.log");
        assert!(config.stderr);
        assert_eq!(config.level, "error");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/sutforge.log")));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LogConfig {
            level: "sutforge=loud".into(),
            format: LogFormat::Pretty,
            file: None,
            stderr: false,
        };
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }
}
