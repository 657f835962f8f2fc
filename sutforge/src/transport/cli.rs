//! Hammer CLI transport.
//!
//! Commands are assembled as
//! `LANG=<locale> [time -p] hammer -v [-u <login> -p <password>] --output=json <subcommand> <action> <options>`
//! and run through a [`RemoteExecutor`]. Output is parsed as JSON and its
//! keys normalised to dashes.

use super::catalog::{self, class_by_name};
use super::{
    Action, Attachment, Options, RemoteExecutor, Request, Transport, TransportError,
    TransportResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sutforge_common::types::normalize_keys;
use sutforge_common::util::display_value;
use sutforge_common::settings::DEFAULT_LOCALE;
use sutforge_common::{ConfigError, Credentials, Settings, mask_sensitive_command};
use tracing::{debug, warn};

/// Remote directory uploaded attachments land in.
const REMOTE_UPLOAD_DIR: &str = "/tmp";

/// Actions whose hammer sub-command is named differently.
const ACTION_ALIASES: &[(&str, &str)] = &[("sync", "synchronize")];

/// Per-class renames: (class, action, hammer action).
const CLASS_ACTION_ALIASES: &[(&str, &str, &str)] = &[("Setting", "update", "set")];

/// Options carried over from `create` into the read-back `info` call.
const READ_BACK_SCOPE: &[&str] = &["organization-id", "organization", "organization-label"];

/// Trim a sub-command and collapse inner whitespace.
pub fn normalize_subcommand(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Double-quote a value for the remote shell.
pub fn quote_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

fn option_name(key: &str) -> String {
    key.trim().replace('_', "-")
}

/// Render an option map as hammer flags.
///
/// `null` and `false` are omitted, `true` becomes a bare `--flag`, lists
/// are comma-joined and every other value is passed as `--key="<value>"`.
pub fn serialize_options(options: &Options) -> String {
    let mut parts = Vec::with_capacity(options.len());
    for (key, value) in options {
        let name = option_name(key);
        match value {
            Value::Null | Value::Bool(false) => continue,
            Value::Bool(true) => parts.push(format!("--{name}")),
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(display_value)
                    .collect::<Vec<_>>()
                    .join(",");
                parts.push(format!("--{name}={}", quote_value(&joined)));
            }
            other => parts.push(format!("--{name}={}", quote_value(&display_value(other)))),
        }
    }
    parts.join(" ")
}

/// Builder for one hammer command line.
#[derive(Debug, Clone)]
pub struct HammerCommand {
    subcommand: String,
    action: String,
    options: Options,
    locale: String,
    timed: bool,
    credentials: Option<Credentials>,
    json_output: bool,
}

impl HammerCommand {
    pub fn new(subcommand: &str, action: &str) -> Self {
        Self {
            subcommand: normalize_subcommand(subcommand),
            action: normalize_subcommand(action),
            options: Options::new(),
            locale: DEFAULT_LOCALE.to_string(),
            timed: false,
            credentials: None,
            json_output: true,
        }
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Prefix the command with `time -p`.
    pub fn timed(mut self, timed: bool) -> Self {
        self.timed = timed;
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    pub fn build(&self) -> String {
        let mut words: Vec<Cow<'_, str>> = vec![format!("LANG={}", self.locale).into()];
        if self.timed {
            words.push("time -p".into());
        }
        words.push("hammer -v".into());
        if let Some(creds) = &self.credentials {
            words.push("-u".into());
            words.push(shell_escape::escape(creds.login.as_str().into()));
            words.push("-p".into());
            words.push(shell_escape::escape(creds.password.as_str().into()));
        }
        if self.json_output {
            words.push("--output=json".into());
        }
        words.push(self.subcommand.as_str().into());
        if !self.action.is_empty() {
            words.push(self.action.as_str().into());
        }
        let tail = serialize_options(&self.options);
        if !tail.is_empty() {
            words.push(tail.into());
        }
        words.join(" ")
    }
}

/// Hammer over SSH.
#[derive(Clone)]
pub struct CliTransport {
    executor: Arc<dyn RemoteExecutor>,
    credentials: Credentials,
    locale: String,
    timed: bool,
    command_timeout: Option<Duration>,
}

impl CliTransport {
    /// Admin credentials from `server.*`, locale from `robottelo.locale`
    /// and the timing prefix from `performance.time_hammer`.
    pub fn new(executor: Arc<dyn RemoteExecutor>, settings: &Settings) -> Result<Self, ConfigError> {
        let server = settings.server()?;
        Ok(Self {
            executor,
            credentials: Credentials::new(server.admin_username, server.admin_password),
            locale: settings.locale()?,
            timed: settings.get_bool_or("performance.time_hammer", false)?,
            command_timeout: None,
        })
    }

    pub fn with_credentials(executor: Arc<dyn RemoteExecutor>, credentials: Credentials) -> Self {
        Self {
            executor,
            credentials,
            locale: DEFAULT_LOCALE.to_string(),
            timed: false,
            command_timeout: None,
        }
    }

    /// A view of this transport that runs every command as `login`.
    pub fn with_user(&self, login: &str, password: &str) -> Self {
        let mut view = self.clone();
        view.credentials = Credentials::new(login, password);
        view
    }

    pub fn timed(mut self, timed: bool) -> Self {
        self.timed = timed;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Assemble the command line for a request without running it.
    pub fn command_for(&self, request: &Request) -> Result<String, TransportError> {
        let class = class_by_name(&request.class)
            .ok_or_else(|| TransportError::UnknownClass(request.class.clone()))?;
        let subcommand = class.hammer.ok_or_else(|| TransportError::Unsupported {
            transport: "cli",
            class: request.class.clone(),
            action: request.action.to_string(),
        })?;
        let action = match &request.action {
            Action::List => class.cli_list,
            other => CLASS_ACTION_ALIASES
                .iter()
                .find(|(cls, name, _)| *cls == class.name && *name == other.as_str())
                .map(|(_, _, alias)| *alias)
                .or_else(|| {
                    ACTION_ALIASES
                        .iter()
                        .find(|(name, _)| *name == other.as_str())
                        .map(|(_, alias)| *alias)
                })
                .unwrap_or(other.as_str()),
        };
        let credentials = request
            .credentials
            .clone()
            .unwrap_or_else(|| self.credentials.clone());
        Ok(HammerCommand::new(subcommand, action)
            .options(request.options.clone())
            .locale(self.locale.clone())
            .timed(self.timed)
            .credentials(Some(credentials))
            .build())
    }

    /// Run a raw command line and parse its JSON output.
    pub async fn execute(&self, command: &str) -> Result<TransportResult, TransportError> {
        self.run_command(command, false).await
    }

    /// With `lenient`, plain-text output (hammer's progress and status
    /// lines for domain actions) is returned as `{"message": <text>}`.
    async fn run_command(&self, command: &str, lenient: bool) -> Result<TransportResult, TransportError> {
        let masked = mask_sensitive_command(command);
        let start = Instant::now();
        let output = self.executor.run(command, self.command_timeout).await?;
        let duration = start.elapsed();

        if !output.success() {
            warn!(
                command = %masked,
                status = output.exit_code,
                stderr = %output.stderr.trim(),
                "Hammer command failed"
            );
            return Err(TransportError::Cli {
                status: output.exit_code,
                stderr: output.stderr,
                command: masked,
            });
        }
        debug!(command = %masked, duration_ms = duration.as_millis() as u64, "Hammer command finished");

        let stdout = output.stdout.trim();
        let parsed = if stdout.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(stdout) {
                Ok(parsed) => parsed,
                Err(_) if lenient => serde_json::json!({ "message": stdout }),
                Err(e) => {
                    return Err(TransportError::Parse {
                        context: masked,
                        reason: e.to_string(),
                    });
                }
            }
        };
        Ok(TransportResult {
            status: output.exit_code,
            output: normalize_keys(parsed),
            stderr: output.stderr,
            duration,
        })
    }

    async fn stage_attachment(&self, attachment: &Attachment) -> Result<String, TransportError> {
        let remote_path = format!(
            "{REMOTE_UPLOAD_DIR}/{}-{}",
            uuid::Uuid::new_v4().simple(),
            attachment.filename
        );
        self.executor
            .upload(&remote_path, &attachment.content)
            .await?;
        Ok(remote_path)
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn kind(&self) -> &'static str {
        "cli"
    }

    fn classes(&self) -> Vec<&'static str> {
        catalog::cli_class_names()
    }

    /// Hammer runs without `--async`, so it blocks on the tasks it starts.
    fn waits_for_tasks(&self) -> bool {
        true
    }

    async fn call(&self, mut request: Request) -> Result<TransportResult, TransportError> {
        if let Some(attachment) = request.attachment.take() {
            let remote_path = self.stage_attachment(&attachment).await?;
            request.options.insert("file".into(), Value::String(remote_path));
        }

        let command = self.command_for(&request)?;
        let lenient = matches!(request.action, Action::Custom(_));
        let result = self.run_command(&command, lenient).await?;
        if request.action != Action::Create {
            return Ok(result);
        }

        // Hammer's create output is a summary; read the full record back.
        let Some(id) = result.output.get("id").filter(|v| !v.is_null()).cloned() else {
            return Ok(result);
        };
        let mut info = Request::new(request.class.clone(), Action::Info)
            .with_credentials(request.credentials.clone())
            .option("id", id);
        for key in READ_BACK_SCOPE {
            if let Some(value) = request.options.get(*key).filter(|v| !v.is_null()) {
                info.options.insert((*key).to_string(), value.clone());
            }
        }
        let info_command = self.command_for(&info)?;
        let mut read_back = self.execute(&info_command).await?;
        read_back.duration += result.duration;
        Ok(read_back)
    }
}
