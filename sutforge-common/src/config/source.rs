//! Source tracking for configuration values.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// `SUTFORGE_*` environment variable.
    Environment,
    /// One of the YAML settings files.
    Yaml(PathBuf),
    /// The legacy INI properties file.
    Legacy(PathBuf),
    /// Derived from other values at lookup time.
    Computed,
    /// Pinned at runtime (worker hostname alignment).
    Pinned,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Environment => write!(f, "environment"),
            Self::Yaml(path) => write!(f, "yaml:{}", path.display()),
            Self::Legacy(path) => write!(f, "legacy:{}", path.display()),
            Self::Computed => write!(f, "computed"),
            Self::Pinned => write!(f, "pinned"),
        }
    }
}

/// A value tagged with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable name when the source is the environment.
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self {
            value,
            source,
            env_var: None,
        }
    }

    pub fn from_env(value: T, var_name: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(var_name.into()),
        }
    }

    pub fn default_value(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
