//! Lazy proxies over sub-paths of the settings tree.

use super::{ConfigError, Settings};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Result of a settings lookup: either a raw value or a node that defers
/// resolution of its children.
#[derive(Debug, Clone)]
pub enum Setting<'a> {
    Leaf(Value),
    Node(SettingsNode<'a>),
}

impl<'a> Setting<'a> {
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf(value) => Some(value),
            Self::Node(_) => None,
        }
    }

    /// Unwrap to the underlying value, resolving a node if needed.
    pub fn into_value(self) -> Result<Value, ConfigError> {
        match self {
            Self::Leaf(value) => Ok(value),
            Self::Node(node) => node.value(),
        }
    }
}

/// A remembered prefix into the settings tree.
///
/// Nothing is resolved until the node is asked for its value, its keys, a
/// path, or is printed.
#[derive(Clone)]
pub struct SettingsNode<'a> {
    settings: &'a Settings,
    prefix: String,
}

impl<'a> SettingsNode<'a> {
    pub(crate) fn new(settings: &'a Settings, prefix: impl Into<String>) -> Self {
        Self {
            settings,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn child_path(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    /// Look up a child; re-wraps mappings unless the child is leaf-only.
    pub fn get(&self, key: &str) -> Result<Setting<'a>, ConfigError> {
        self.settings.get(&self.child_path(key))
    }

    /// A child node, without resolving anything.
    pub fn node(&self, key: &str) -> SettingsNode<'a> {
        SettingsNode::new(self.settings, self.child_path(key))
    }

    /// Resolve the whole subtree.
    pub fn value(&self) -> Result<Value, ConfigError> {
        self.settings.get_value(&self.prefix)
    }

    /// Keys of the resolved mapping, sorted.
    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Key/value pairs of the resolved mapping, sorted by key. A scalar
    /// node yields no entries.
    pub fn entries(&self) -> Result<Vec<(String, Value)>, ConfigError> {
        match self.value()? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Interpret the resolved value as a filesystem path.
    pub fn as_path(&self) -> Result<PathBuf, ConfigError> {
        match self.value()? {
            Value::String(s) => Ok(crate::config::env::expand_home(&s)),
            other => Err(ConfigError::Type {
                path: self.prefix.clone(),
                expected: "path string",
                found: other.to_string(),
            }),
        }
    }
}

impl fmt::Debug for SettingsNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsNode")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl fmt::Display for SettingsNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Ok(Value::String(s)) => f.write_str(&s),
            Ok(other) => write!(f, "{other}"),
            Err(_) => write!(f, "<unset {}>", self.prefix),
        }
    }
}
