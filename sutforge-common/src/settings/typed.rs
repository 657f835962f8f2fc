//! Typed views over the sections the harness core reads itself.

use super::{ConfigError, Settings};
use crate::config::env::expand_home;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_LOCALE: &str = "en_US.UTF-8";

/// `[server]`
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub hostname: String,
    pub hostnames: Vec<String>,
    pub admin_username: String,
    #[serde(skip_serializing)]
    pub admin_password: String,
    pub scheme: String,
    pub port: Option<u16>,
    pub ssh_username: String,
    #[serde(skip_serializing)]
    pub ssh_password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub version: Option<String>,
}

impl ServerSettings {
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        let port = match settings.get_opt_u64("server.port")? {
            Some(p) => Some(u16::try_from(p).map_err(|_| ConfigError::Type {
                path: "server.port".into(),
                expected: "port number",
                found: p.to_string(),
            })?),
            None => None,
        };
        Ok(Self {
            hostname: settings.get_string("server.hostname")?,
            hostnames: settings.get_list_or_empty("server.hostnames")?,
            admin_username: settings.get_string("server.admin_username")?,
            admin_password: settings.get_string("server.admin_password")?,
            scheme: settings
                .get_opt_string("server.scheme")?
                .unwrap_or_else(|| "https".to_string()),
            port,
            ssh_username: settings
                .get_opt_string("server.ssh_username")?
                .unwrap_or_else(|| "root".to_string()),
            ssh_password: settings.get_opt_string("server.ssh_password")?,
            ssh_key: settings
                .get_opt_string("server.ssh_key")?
                .map(|k| expand_home(&k)),
            version: settings.get_opt_string("server.version")?,
        })
    }

    /// Base URL of the SUT's API.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.hostname, port),
            None => format!("{}://{}", self.scheme, self.hostname),
        }
    }
}

/// SSH client timeouts, read from `server.ssh_client` (or the legacy
/// `[ssh_client]` section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SshClientSettings {
    #[serde(with = "humantime_serde_secs")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub command_timeout: Duration,
}

impl Default for SshClientSettings {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl SshClientSettings {
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            connection_timeout: settings
                .get_opt_duration("server.ssh_client.connection_timeout")?
                .unwrap_or(defaults.connection_timeout),
            command_timeout: settings
                .get_opt_duration("server.ssh_client.command_timeout")?
                .unwrap_or(defaults.command_timeout),
        })
    }
}

mod humantime_serde_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }
}

/// `[shared_function]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedFunctionSettings {
    pub enabled: bool,
    pub storage: String,
    pub scope: Option<String>,
    pub lock_timeout: u64,
    pub share_timeout: u64,
    pub call_retries: u64,
}

impl Default for SharedFunctionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            storage: "file".to_string(),
            scope: None,
            lock_timeout: 7200,
            share_timeout: 86400,
            call_retries: 2,
        }
    }
}

impl SharedFunctionSettings {
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        if !settings.is_set("shared_function") {
            return Ok(defaults);
        }
        Ok(Self {
            enabled: settings.get_bool_or("shared_function.enabled", defaults.enabled)?,
            storage: settings
                .get_opt_string("shared_function.storage")?
                .unwrap_or(defaults.storage),
            scope: settings.get_opt_string("shared_function.scope")?,
            lock_timeout: settings
                .get_opt_u64("shared_function.lock_timeout")?
                .unwrap_or(defaults.lock_timeout),
            share_timeout: settings
                .get_opt_u64("shared_function.share_timeout")?
                .unwrap_or(defaults.share_timeout),
            call_retries: settings
                .get_opt_u64("shared_function.call_retries")?
                .unwrap_or(defaults.call_retries),
        })
    }
}
