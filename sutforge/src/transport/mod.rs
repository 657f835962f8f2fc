//! Transports: the two ways the harness talks to the SUT.
//!
//! Both the REST API ([`api::ApiTransport`]) and hammer over SSH
//! ([`cli::CliTransport`]) implement [`Transport`], so factories, setup
//! scenarios and scoped helpers never care which one is underneath. The
//! in-memory [`mock::MockSut`] implements the same trait for tests.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod mock;
pub mod ssh;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use sutforge_common::{ConfigError, Credentials, EntityHandle, ErrorCode, Settings};
use thiserror::Error;

pub use api::ApiTransport;
pub use catalog::{EntityClass, class_by_name, class_names};
pub use cli::{CliTransport, HammerCommand, serialize_options};
pub use ssh::{CommandOutput, RemoteExecutor, SshClient, SshError, SshOptions};

/// Option map passed to a transport call. Keys are dash-separated.
pub type Options = Map<String, Value>;

/// What to do with an entity class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Info,
    List,
    Update,
    Delete,
    /// Domain action such as `sync`, `publish` or `upload`.
    Custom(String),
}

impl Action {
    /// Parse a sub-command name, normalising whitespace.
    pub fn parse(raw: &str) -> Self {
        let normalized = cli::normalize_subcommand(raw);
        match normalized.as_str() {
            "create" => Self::Create,
            "info" | "read" => Self::Info,
            "list" | "search" => Self::List,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Custom(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Info => "info",
            Self::List => "list",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Custom(name) => name,
        }
    }

    /// Reads that are safe to retry.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Info | Self::List)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File content shipped with a call (manifest uploads).
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("bytes", &self.content.len())
            .finish()
    }
}

impl From<sutforge_common::Manifest> for Attachment {
    fn from(manifest: sutforge_common::Manifest) -> Self {
        Self {
            filename: manifest.filename,
            content: manifest.content,
        }
    }
}

/// One call against an entity class.
#[derive(Debug, Clone)]
pub struct Request {
    pub class: String,
    pub action: Action,
    pub options: Options,
    pub credentials: Option<Credentials>,
    pub attachment: Option<Attachment>,
}

impl Request {
    pub fn new(class: impl Into<String>, action: Action) -> Self {
        Self {
            class: class.into(),
            action,
            options: Options::new(),
            credentials: None,
            attachment: None,
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// `id` option, if present.
    pub fn id(&self) -> Option<String> {
        match self.options.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Parsed outcome of a successful call.
#[derive(Debug, Clone)]
pub struct TransportResult {
    pub status: i32,
    /// Parsed output with keys normalised to dashes.
    pub output: Value,
    pub stderr: String,
    pub duration: Duration,
}

impl TransportResult {
    pub fn new(output: Value) -> Self {
        Self {
            status: 0,
            output,
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Output as a single handle. One-element lists are unwrapped.
    pub fn into_handle(self) -> Option<EntityHandle> {
        match self.output {
            Value::Array(mut items) if items.len() == 1 => EntityHandle::from_value(items.remove(0)),
            other => EntityHandle::from_value(other),
        }
    }

    /// Output as a list of handles. A single object becomes a one-element
    /// list and non-object entries are skipped.
    pub fn into_handles(self) -> Vec<EntityHandle> {
        match self.output {
            Value::Array(items) => items.into_iter().filter_map(EntityHandle::from_value).collect(),
            Value::Object(map) => vec![EntityHandle::new(map)],
            _ => Vec::new(),
        }
    }
}

/// Errors raised by a transport call. The SUT's own message is carried
/// verbatim so callers can embed it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Command \"{command}\" finished with exit status {status}\nstderr contains:\n{stderr}")]
    Cli {
        status: i32,
        stderr: String,
        command: String,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Http {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    #[error("{method} {url} could not be sent: {source}")]
    Request {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Could not parse output of {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("{transport} transport does not support {action} on {class}")]
    Unsupported {
        transport: &'static str,
        class: String,
        action: String,
    },

    #[error("Unknown entity class '{0}'")]
    UnknownClass(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Cli { .. } => ErrorCode::CliNonZeroExit,
            Self::Http { .. } => ErrorCode::HttpStatus,
            Self::Request { .. } => ErrorCode::HttpRequestFailed,
            Self::Ssh(err) => err.code(),
            Self::Parse { .. } => ErrorCode::TransportParse,
            Self::Unsupported { .. } | Self::UnknownClass(_) => ErrorCode::TransportUnsupported,
            Self::Config(err) => err.code(),
        }
    }

    /// The SUT's message without transport framing: CLI stderr or the HTTP
    /// response body.
    pub fn sut_message(&self) -> String {
        match self {
            Self::Cli { stderr, .. } => stderr.trim().to_string(),
            Self::Http { body, .. } => body.trim().to_string(),
            other => other.to_string(),
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Request { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Ssh(err) => err.is_transient(),
            // 255 is ssh's own failure status, not hammer's.
            Self::Cli { status, stderr, .. } => {
                *status == 255
                    || stderr.contains("Connection refused")
                    || stderr.contains("503 Service Unavailable")
                    || stderr.contains("Timed out")
            }
            _ => false,
        }
    }
}

/// Something that can run entity calls against the SUT.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs (`api`, `cli`, `mock`).
    fn kind(&self) -> &'static str;

    /// Entity class names this transport can address.
    fn classes(&self) -> Vec<&'static str> {
        class_names()
    }

    /// Whether an action returns only once the SUT task it started has
    /// finished, so a successful exit already is the terminal state.
    fn waits_for_tasks(&self) -> bool {
        false
    }

    async fn call(&self, request: Request) -> Result<TransportResult, TransportError>;
}

/// Both transports bound to one SUT host.
#[derive(Clone)]
pub struct TransportSet {
    pub hostname: String,
    pub executor: Arc<dyn RemoteExecutor>,
    pub api: Arc<dyn Transport>,
    pub cli: Arc<dyn Transport>,
}

impl TransportSet {
    /// Build SSH, hammer and API transports from settings. The hostname is
    /// read through the settings layer, so a pinned worker hostname wins.
    pub fn from_settings(settings: Arc<Settings>) -> Result<Self, TransportError> {
        let server = settings.server()?;
        let ssh_options = SshOptions::from_settings(&settings)?;
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SshClient::new(server.hostname.clone(), ssh_options));
        let cli: Arc<dyn Transport> =
            Arc::new(CliTransport::new(executor.clone(), &settings)?);
        let api: Arc<dyn Transport> = Arc::new(ApiTransport::new(&settings)?);
        tracing::info!(hostname = %server.hostname, "Transports configured");
        Ok(Self {
            hostname: server.hostname,
            executor,
            api,
            cli,
        })
    }
}
