//! Remote command execution over SSH.
//!
//! [`SshClient`] multiplexes every command over one `openssh` master
//! connection, opened lazily on first use. Connection and command
//! timeouts are independent.

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sutforge_common::settings::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT};
use sutforge_common::{ConfigError, ErrorCode, Settings, mask_sensitive_command};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SshError {
    #[error("Failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("Command on {host} timed out after {}: {command}", humantime::format_duration(*.timeout))]
    Timeout {
        host: String,
        command: String,
        timeout: Duration,
    },

    #[error("Failed to run command on {host}: {message}")]
    Exec { host: String, message: String },

    #[error("Failed to upload {path} to {host}: {message}")]
    Upload {
        host: String,
        path: String,
        message: String,
    },
}

impl SshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::SshTimeout,
            _ => ErrorCode::SshConnectionFailed,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// Result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands on one remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    fn host(&self) -> &str;

    /// Run `command` through the remote shell. `timeout` overrides the
    /// executor's default command timeout.
    async fn run(&self, command: &str, timeout: Option<Duration>)
    -> Result<CommandOutput, SshError>;

    /// Write `content` to `remote_path`.
    async fn upload(&self, remote_path: &str, content: &[u8]) -> Result<(), SshError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub user: String,
    pub port: Option<u16>,
    pub key: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Accept and record unknown host keys.
    pub accept_new_hosts: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: None,
            key: None,
            connect_timeout: DEFAULT_CONNECTION_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            accept_new_hosts: true,
        }
    }
}

impl SshOptions {
    /// Read `server.ssh_*` and the `ssh_client` timeouts.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let server = settings.server()?;
        let timeouts = settings.ssh_client()?;
        let port = match settings.get_opt_u64("server.ssh_port")? {
            Some(p) => Some(u16::try_from(p).map_err(|_| ConfigError::Type {
                path: "server.ssh_port".into(),
                expected: "port number",
                found: p.to_string(),
            })?),
            None => None,
        };
        Ok(Self {
            user: server.ssh_username,
            port,
            key: server.ssh_key,
            connect_timeout: timeouts.connection_timeout,
            command_timeout: timeouts.command_timeout,
            accept_new_hosts: true,
        })
    }
}

pub struct SshClient {
    host: String,
    options: SshOptions,
    session: OnceCell<Session>,
}

impl SshClient {
    pub fn new(host: impl Into<String>, options: SshOptions) -> Self {
        Self {
            host: host.into(),
            options,
            session: OnceCell::new(),
        }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Open the master connection if it is not open yet.
    pub async fn connect(&self) -> Result<&Session, SshError> {
        self.session
            .get_or_try_init(|| async {
                let mut builder = SessionBuilder::default();
                builder
                    .user(self.options.user.clone())
                    .connect_timeout(self.options.connect_timeout)
                    .known_hosts_check(if self.options.accept_new_hosts {
                        KnownHosts::Add
                    } else {
                        KnownHosts::Strict
                    });
                if let Some(port) = self.options.port {
                    builder.port(port);
                }
                if let Some(key) = &self.options.key {
                    builder.keyfile(key);
                }

                debug!(host = %self.host, user = %self.options.user, "Opening SSH session");
                let connect = builder.connect(&self.host);
                match tokio::time::timeout(self.options.connect_timeout, connect).await {
                    Ok(Ok(session)) => {
                        info!(host = %self.host, "SSH session established");
                        Ok(session)
                    }
                    Ok(Err(e)) => Err(SshError::Connect {
                        host: self.host.clone(),
                        message: e.to_string(),
                    }),
                    Err(_) => Err(SshError::Connect {
                        host: self.host.clone(),
                        message: format!(
                            "connection timed out after {}",
                            humantime::format_duration(self.options.connect_timeout)
                        ),
                    }),
                }
            })
            .await
    }

    /// Close the master connection. A later call reconnects.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(e) = session.close().await
        {
            warn!(host = %self.host, error = %e, "Error closing SSH session");
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SshError> {
        let session = self.connect().await?;
        let masked = mask_sensitive_command(command);
        let timeout = timeout.unwrap_or(self.options.command_timeout);
        debug!(host = %self.host, command = %masked, "Running remote command");

        let start = Instant::now();
        let output = match tokio::time::timeout(timeout, session.shell(command).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SshError::Exec {
                    host: self.host.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(SshError::Timeout {
                    host: self.host.clone(),
                    command: masked,
                    timeout,
                });
            }
        };
        let duration = start.elapsed();

        let result = CommandOutput {
            // A command killed by a signal has no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        };
        debug!(
            host = %self.host,
            exit_code = result.exit_code,
            duration_ms = duration.as_millis() as u64,
            "Remote command finished"
        );
        Ok(result)
    }

    async fn upload(&self, remote_path: &str, content: &[u8]) -> Result<(), SshError> {
        let session = self.connect().await?;
        let upload_error = |message: String| SshError::Upload {
            host: self.host.clone(),
            path: remote_path.to_string(),
            message,
        };
        let quoted = shell_escape::escape(remote_path.into());
        debug!(host = %self.host, path = %remote_path, bytes = content.len(), "Uploading file");

        let mut child = session
            .shell(format!("cat > {quoted}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        let Some(mut stdin) = child.stdin().take() else {
            return Err(upload_error("remote stdin was not captured".to_string()));
        };
        stdin
            .write_all(content)
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        if !output.status.success() {
            return Err(upload_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
