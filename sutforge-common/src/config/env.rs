//! `SUTFORGE_*` environment variables.
//!
//! Two families share the prefix: harness knobs such as
//! `SUTFORGE_SETTINGS_DIR` or `SUTFORGE_LOG_LEVEL`, and section overrides
//! named `SUTFORGE_<SECTION>_<OPTION>`. Overrides always win over both
//! settings files.

use super::source::Sourced;
use crate::casts::{self, CastError};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Fixed prefix of every harness environment variable (without the
/// trailing underscore).
pub const ENV_PREFIX: &str = "SUTFORGE";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var} has an unusable value: {source}")]
    InvalidValue {
        var: String,
        #[source]
        source: CastError,
    },

    #[error("{var} points at {path}, which does not exist")]
    PathNotFound { var: String, path: PathBuf },
}

/// Name of the override variable for a section option.
///
/// Dots and dashes in either part become underscores, so
/// `("http_proxy", "auth-proxy-url")` maps to
/// `SUTFORGE_HTTP_PROXY_AUTH_PROXY_URL`.
pub fn override_var_name(section: &str, option: &str) -> String {
    let normalize = |s: &str| s.replace(['.', '-'], "_").to_ascii_uppercase();
    format!("{}_{}_{}", ENV_PREFIX, normalize(section), normalize(option))
}

/// Reads harness knobs, remembering bad values instead of failing on the
/// first one. Callers drain [`EnvParser::take_errors`] once they are done.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// `(variable, value)` for a knob, if the variable is present.
    fn lookup(name: &str) -> Option<(String, String)> {
        let var = format!("{ENV_PREFIX}_{name}");
        let value = env::var(&var).ok()?;
        Some((var, value))
    }

    pub fn get_string(&self, name: &str, default: &str) -> Sourced<String> {
        match Self::lookup(name) {
            Some((var, value)) => Sourced::from_env(value, var),
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Present-but-empty reads as `None`.
    pub fn get_optional_string(&self, name: &str) -> Sourced<Option<String>> {
        match Self::lookup(name) {
            Some((var, value)) => Sourced::from_env(Some(value).filter(|v| !v.is_empty()), var),
            None => Sourced::default_value(None),
        }
    }

    /// Boolean knob through the boolean cast. A blank variable counts as
    /// unset; a value the cast rejects is recorded and the default used.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let Some((var, value)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        if value.trim().is_empty() {
            return Sourced::default_value(default);
        }
        let parsed = casts::cast_bool(&value).unwrap_or_else(|source| {
            self.errors.push(EnvError::InvalidValue {
                var: var.clone(),
                source,
            });
            default
        });
        Sourced::from_env(parsed, var)
    }

    /// Path knob with `~/` expanded. With `must_exist`, a missing path is
    /// recorded as an error but still returned.
    pub fn get_path(&mut self, name: &str, default: &str, must_exist: bool) -> Sourced<PathBuf> {
        let sourced = match Self::lookup(name) {
            Some((var, value)) => Sourced::from_env(expand_home(&value), var),
            None => Sourced::default_value(expand_home(default)),
        };
        if must_exist && !sourced.value.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: format!("{ENV_PREFIX}_{name}"),
                path: sourced.value.clone(),
            });
        }
        sourced
    }

    /// The override for `[section] option`, if one is exported.
    pub fn get_override(&self, section: &str, option: &str) -> Option<Sourced<String>> {
        let var = override_var_name(section, option);
        env::var(&var).ok().map(|value| Sourced::from_env(value, var))
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
