use crate::casts::CastError;
use crate::config::LegacyError;
use crate::errors::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or reading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file or directory is absent at configure time.
    #[error("Improperly configured: {} does not exist", .path.display())]
    Missing { path: PathBuf },

    /// One or more sections failed validation; one message per line.
    #[error("Improperly configured:\n{}", .errors.join("\n"))]
    Invalid { errors: Vec<String> },

    #[error("Failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    /// A dotted path did not resolve anywhere.
    #[error("'{path}' is not set (tried: {})", .providers.join(", "))]
    UnknownPath {
        path: String,
        providers: Vec<String>,
    },

    #[error("Invalid value for '{path}': {source}")]
    Cast {
        path: String,
        #[source]
        source: CastError,
    },

    #[error("Invalid value for '{path}': expected {expected}, found {found}")]
    Type {
        path: String,
        expected: &'static str,
        found: String,
    },

    #[error("Section [{0}] is not set")]
    SectionNotSet(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. } => ErrorCode::ConfigMissing,
            Self::Invalid { .. } => ErrorCode::ConfigInvalid,
            Self::Yaml { .. } | Self::Io { .. } | Self::Legacy(_) => ErrorCode::ConfigParseError,
            Self::UnknownPath { .. } => ErrorCode::ConfigUnknownPath,
            Self::Cast { .. } | Self::Type { .. } => ErrorCode::ConfigCastError,
            Self::SectionNotSet(_) => ErrorCode::ConfigSectionNotSet,
        }
    }

    /// Whether the error only means "nothing configured at this path".
    pub fn is_unknown_path(&self) -> bool {
        matches!(self, Self::UnknownPath { .. })
    }
}
