//! Plain records shared by transports, factories and setup scenarios.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which SUT role a dispatcher builds entities against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Server,
    Capsule,
}

impl TargetKind {
    /// Settings path of the hostname for this target.
    pub fn hostname_path(self) -> &'static str {
        match self {
            Self::Server => "server.hostname",
            Self::Capsule => "capsule.hostname",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Capsule => write!(f, "capsule"),
        }
    }
}

/// Login/password pair used to scope transport calls to a user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// Mapping returned by a create or read call.
///
/// Keys are normalised to lowercase with dashes (`published-at`). Handles
/// always carry `id` and `name` when the SUT returned them; everything else
/// is domain specific.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(Map<String, Value>);

impl EntityHandle {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wrap a JSON object; any other value yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Numeric id. Accepts numbers and numeric strings.
    pub fn id(&self) -> Option<u64> {
        match self.0.get("id")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numeric field, accepting numeric strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for EntityHandle {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Normalise a key the way the CLI reports it: `Published At` becomes
/// `published-at`.
pub fn normalize_key(key: &str) -> String {
    key.trim().replace([' ', '_'], "-").to_ascii_lowercase()
}

/// Recursively normalise every key in a JSON value.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (normalize_key(&k), normalize_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// State of a SUT background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Planning,
    Planned,
    Pending,
    Running,
    Paused,
    Stopped,
    Finished,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or(Self::Unknown)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paused | Self::Stopped | Self::Finished | Self::Error)
    }
}

/// Outcome reported with a terminal task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Pending,
    Success,
    Warning,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskOutcome {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or(Self::Unknown)
    }
}

/// A SUT task as seen through the task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
    pub label: String,
    pub state: TaskState,
    pub result: TaskOutcome,
    #[serde(default)]
    pub input: Map<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskHandle {
    /// Build from a raw task record. Missing fields fall back to neutral
    /// values so a half-populated record still polls.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let id = match map.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let str_field = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or_default();
        let started_at = map
            .get("started-at")
            .or_else(|| map.get("started_at"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(Self {
            id,
            label: str_field("label").to_string(),
            state: TaskState::parse(str_field("state")),
            result: TaskOutcome::parse(str_field("result")),
            input: map
                .get("input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            started_at,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal and successful.
    pub fn succeeded(&self) -> bool {
        matches!(self.state, TaskState::Stopped | TaskState::Finished)
            && self.result == TaskOutcome::Success
    }
}

/// An entitlement manifest ready for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct Manifest {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Manifest {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("filename", &self.filename)
            .field("bytes", &self.content.len())
            .finish()
    }
}
