//! The composite settings store.
//!
//! `Settings::get("a.b.c")` resolves a dotted path by trying, in order:
//!
//! 1. the in-process cache,
//! 2. computed keys (`all_features`, `verbosity`, `server.hostname`),
//! 3. the legacy namespace alias (`robottelo.x` and `repos.x` also try `x`),
//! 4. each provider in turn: environment overrides, the merged YAML tree,
//!    then the legacy INI file.
//!
//! The first provider that yields a value wins and the result is cached
//! under the path exactly as the caller spelled it. Mappings come back as
//! [`SettingsNode`] proxies unless the path is on the leaf-only list.

mod error;
mod node;
pub mod provider;
mod typed;

pub use error::ConfigError;
pub use node::{Setting, SettingsNode};
pub use provider::{EnvProvider, LegacyProvider, Provider, YamlProvider};
pub use typed::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_LOCALE, ServerSettings,
    SharedFunctionSettings, SshClientSettings,
};

use crate::casts::{self, LogLevel};
use crate::config::sections::{self, SECTIONS};
use crate::config::{ConfigSource, EnvParser, LEGACY_FILENAME, LegacyReader, Sourced};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paths whose mappings are returned raw instead of as a node.
pub const LEAF_ONLY: &[&str] = &[
    "server.hostnames",
    "server.ssh_client",
    "repos.custom_repos",
    "robottelo.webdriver_desired_capabilities",
    "shared_function",
];

/// Namespaces whose keys may also live at the top level.
const ALIASED_NAMESPACES: &[&str] = &["robottelo", "repos"];

pub fn is_leaf_only(path: &str) -> bool {
    LEAF_ONLY.iter().any(|p| p.eq_ignore_ascii_case(path))
}

/// Options for [`configure`].
#[derive(Debug, Clone)]
pub struct ConfigureOptions {
    pub settings_dir: PathBuf,
    /// Soft mode: missing files and invalid sections are logged, and the
    /// affected sections report as unset, instead of failing.
    pub lazy: bool,
}

impl ConfigureOptions {
    pub fn new(settings_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings_dir: settings_dir.into(),
            lazy: false,
        }
    }

    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Read `SUTFORGE_SETTINGS_DIR` (default `.`) and `SUTFORGE_SETTINGS_LAZY`.
    pub fn from_env() -> Self {
        let mut parser = EnvParser::new();
        let dir = parser.get_path("SETTINGS_DIR", ".", false);
        let lazy = parser.get_bool("SETTINGS_LAZY", false);
        for err in parser.take_errors() {
            warn!("{err}");
        }
        Self {
            settings_dir: dir.value,
            lazy: lazy.value,
        }
    }
}

/// Load every settings source under `options.settings_dir` and validate.
///
/// In strict mode any section error fails the whole call with a single
/// aggregated [`ConfigError::Invalid`].
pub fn configure(options: &ConfigureOptions) -> Result<Settings, ConfigError> {
    let dir = &options.settings_dir;
    if !dir.is_dir() {
        if options.lazy {
            warn!(dir = %dir.display(), "settings directory missing, continuing with empty settings");
            return Ok(Settings::empty());
        }
        return Err(ConfigError::Missing { path: dir.clone() });
    }

    let yaml = YamlProvider::load(dir)?;
    let legacy_path = dir.join(LEGACY_FILENAME);
    let legacy = if legacy_path.is_file() {
        Some(LegacyProvider::new(LegacyReader::from_file(&legacy_path)?))
    } else {
        None
    };

    if yaml.files().is_empty() && legacy.is_none() && !options.lazy {
        return Err(ConfigError::Missing {
            path: dir.join(provider::YAML_FILENAME),
        });
    }

    let mut settings = Settings::new(Some(yaml), legacy);
    settings.settings_dir = Some(dir.clone());

    let section_errors = settings.section_errors();
    if !section_errors.is_empty() {
        if !options.lazy {
            return Err(ConfigError::Invalid {
                errors: section_errors.into_values().flatten().collect(),
            });
        }
        for (section, errors) in &section_errors {
            for error in errors {
                warn!(section = section.as_str(), "{error}");
            }
        }
        settings.invalid_sections = section_errors.into_keys().collect();
    }

    info!(
        dir = %dir.display(),
        sections = settings.sections().len(),
        lazy = options.lazy,
        "settings configured"
    );
    Ok(settings)
}

/// Process-wide settings value, threaded explicitly through transports and
/// factories.
pub struct Settings {
    env: EnvProvider,
    yaml: Option<YamlProvider>,
    legacy: Option<LegacyProvider>,
    cache: Mutex<HashMap<String, Sourced<Value>>>,
    pinned_hostname: Mutex<Option<String>>,
    invalid_sections: BTreeSet<String>,
    settings_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("providers", &self.provider_names())
            .field("settings_dir", &self.settings_dir)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn new(yaml: Option<YamlProvider>, legacy: Option<LegacyProvider>) -> Self {
        Self {
            env: EnvProvider::new(),
            yaml,
            legacy,
            cache: Mutex::new(HashMap::new()),
            pinned_hostname: Mutex::new(None),
            invalid_sections: BTreeSet::new(),
            settings_dir: None,
        }
    }

    /// Settings backed only by environment overrides.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    /// Settings from a single YAML document. Environment overrides still
    /// apply.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(Some(YamlProvider::parse(content)?), None))
    }

    pub fn settings_dir(&self) -> Option<&Path> {
        self.settings_dir.as_deref()
    }

    fn providers(&self) -> Vec<&dyn Provider> {
        let mut providers: Vec<&dyn Provider> = vec![&self.env];
        if let Some(yaml) = &self.yaml {
            providers.push(yaml);
        }
        if let Some(legacy) = &self.legacy {
            providers.push(legacy);
        }
        providers
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolve a dotted path, wrapping mappings in a node proxy.
    pub fn get(&self, path: &str) -> Result<Setting<'_>, ConfigError> {
        let value = self.get_value(path)?;
        if value.is_object() && !is_leaf_only(path) {
            Ok(Setting::Node(SettingsNode::new(self, path)))
        } else {
            Ok(Setting::Leaf(value))
        }
    }

    /// A node for `path` without resolving it.
    pub fn node(&self, path: &str) -> SettingsNode<'_> {
        SettingsNode::new(self, path)
    }

    /// Resolve a dotted path to its raw value.
    pub fn get_value(&self, path: &str) -> Result<Value, ConfigError> {
        self.get_sourced(path).map(Sourced::into_inner)
    }

    /// Where the value at `path` came from.
    pub fn source_of(&self, path: &str) -> Result<ConfigSource, ConfigError> {
        self.get_sourced(path).map(|s| s.source)
    }

    /// Resolve a dotted path, keeping its source.
    pub fn get_sourced(&self, path: &str) -> Result<Sourced<Value>, ConfigError> {
        if let Some(hit) = self.cache_lock().get(path) {
            return Ok(hit.clone());
        }

        let segments: Vec<&str> = path.trim().split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(self.unknown(path));
        }

        let resolved = match self.computed(&segments)? {
            Some(found) => Some(found),
            None => self.walk_candidates(&segments),
        };

        match resolved {
            Some(found) => {
                self.cache_lock().insert(path.to_string(), found.clone());
                Ok(found)
            }
            None => {
                if !segments.iter().any(|s| s.starts_with('_')) {
                    debug!(path, providers = ?self.provider_names(), "settings path not found");
                }
                Err(self.unknown(path))
            }
        }
    }

    fn unknown(&self, path: &str) -> ConfigError {
        ConfigError::UnknownPath {
            path: path.to_string(),
            providers: self.provider_names(),
        }
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Sourced<Value>>> {
        self.cache.lock().expect("settings cache mutex poisoned")
    }

    fn computed(&self, segments: &[&str]) -> Result<Option<Sourced<Value>>, ConfigError> {
        let key = segments.join(".").to_ascii_lowercase();
        match key.as_str() {
            "all_features" => {
                let features: Vec<Value> = self.sections().into_iter().map(Value::String).collect();
                Ok(Some(Sourced::new(Value::Array(features), ConfigSource::Computed)))
            }
            "verbosity" | "robottelo.verbosity" => {
                let level = self.verbosity()?;
                Ok(Some(Sourced::new(
                    Value::String(level.as_str().to_string()),
                    ConfigSource::Computed,
                )))
            }
            "server.hostname" => Ok(self.hostname_lookup()),
            _ => Ok(None),
        }
    }

    /// Pinned worker hostname, else the providers, else a direct read of
    /// the legacy file.
    fn hostname_lookup(&self) -> Option<Sourced<Value>> {
        if let Some(pinned) = self.pinned_hostname() {
            return Some(Sourced::new(Value::String(pinned), ConfigSource::Pinned));
        }
        if let Some(found) = self.walk_providers(&["server", "hostname"]) {
            return Some(found);
        }
        let legacy = self.legacy.as_ref()?;
        let raw = legacy.read_raw("server", "hostname")?;
        Some(Sourced::new(
            Value::String(raw.to_string()),
            ConfigSource::Legacy(PathBuf::from(LEGACY_FILENAME)),
        ))
    }

    /// Legacy `robottelo.x` and `repos.x` read `x` first; the full path is
    /// walked when the alias finds nothing.
    fn walk_candidates(&self, segments: &[&str]) -> Option<Sourced<Value>> {
        if let [namespace, rest @ ..] = segments
            && !rest.is_empty()
            && ALIASED_NAMESPACES
                .iter()
                .any(|ns| ns.eq_ignore_ascii_case(namespace))
            && let Some(found) = self.walk_providers(rest)
        {
            return Some(found);
        }
        self.walk_providers(segments)
    }

    fn walk_providers(&self, segments: &[&str]) -> Option<Sourced<Value>> {
        for provider in self.providers() {
            if let Some(mut found) = provider.lookup(segments) {
                if found.source != ConfigSource::Environment {
                    self.env.overlay(segments, &mut found.value);
                }
                return Some(found);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    fn optional(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        match self.get_value(path) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_unknown_path() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_string(&self, path: &str) -> Result<String, ConfigError> {
        value_to_string(path, self.get_value(path)?)
    }

    pub fn get_opt_string(&self, path: &str) -> Result<Option<String>, ConfigError> {
        self.optional(path)?
            .map(|v| value_to_string(path, v))
            .transpose()
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigError> {
        value_to_bool(path, self.get_value(path)?)
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(path)? {
            Some(value) => value_to_bool(path, value),
            None => Ok(default),
        }
    }

    pub fn get_list(&self, path: &str) -> Result<Vec<String>, ConfigError> {
        value_to_list(path, self.get_value(path)?)
    }

    pub fn get_list_or_empty(&self, path: &str) -> Result<Vec<String>, ConfigError> {
        match self.optional(path)? {
            Some(value) => value_to_list(path, value),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_opt_u64(&self, path: &str) -> Result<Option<u64>, ConfigError> {
        let Some(value) = self.optional(path)? else {
            return Ok(None);
        };
        let parsed = match &value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| ConfigError::Type {
            path: path.to_string(),
            expected: "non-negative integer",
            found: value.to_string(),
        })
    }

    pub fn get_opt_duration(&self, path: &str) -> Result<Option<Duration>, ConfigError> {
        let Some(value) = self.optional(path)? else {
            return Ok(None);
        };
        sections::duration_from_value(&value)
            .map(Some)
            .ok_or_else(|| ConfigError::Type {
                path: path.to_string(),
                expected: "duration",
                found: value.to_string(),
            })
    }

    /// Logging level derived from `robottelo.verbosity` (default `info`).
    pub fn verbosity(&self) -> Result<LogLevel, ConfigError> {
        let raw = self
            .walk_providers(&["robottelo", "verbosity"])
            .or_else(|| self.walk_providers(&["verbosity"]));
        match raw.map(|s| s.value) {
            None | Some(Value::Null) => Ok(LogLevel::Info),
            Some(Value::String(s)) => casts::cast_log_level(&s).map_err(|source| ConfigError::Cast {
                path: "robottelo.verbosity".into(),
                source,
            }),
            Some(other) => Err(ConfigError::Type {
                path: "robottelo.verbosity".into(),
                expected: "logging level",
                found: other.to_string(),
            }),
        }
    }

    /// Locale used for every hammer command.
    pub fn locale(&self) -> Result<String, ConfigError> {
        Ok(self
            .get_opt_string("robottelo.locale")?
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string()))
    }

    /// Directory used for downloaded artefacts.
    pub fn tmp_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self
            .get_opt_string("robottelo.tmp_dir")?
            .map(|d| crate::config::env::expand_home(&d))
            .unwrap_or_else(std::env::temp_dir))
    }

    pub fn server(&self) -> Result<ServerSettings, ConfigError> {
        ServerSettings::load(self)
    }

    pub fn ssh_client(&self) -> Result<SshClientSettings, ConfigError> {
        SshClientSettings::load(self)
    }

    pub fn shared_function(&self) -> Result<SharedFunctionSettings, ConfigError> {
        SharedFunctionSettings::load(self)
    }

    // ------------------------------------------------------------------
    // Sections and validation
    // ------------------------------------------------------------------

    /// Sorted union of top-level sections across providers.
    pub fn sections(&self) -> Vec<String> {
        let all: BTreeSet<String> = self
            .providers()
            .iter()
            .flat_map(|p| p.sections())
            .collect();
        all.into_iter().collect()
    }

    /// Whether a section is present, non-empty and (in lazy mode) valid.
    pub fn is_set(&self, section: &str) -> bool {
        if self.invalid_sections.contains(section) {
            return false;
        }
        match self.optional(section) {
            Ok(Some(Value::Object(map))) => !map.is_empty(),
            Ok(Some(_)) => true,
            _ => false,
        }
    }

    /// The resolved mapping of a section.
    pub fn section_map(&self, section: &str) -> Result<Map<String, Value>, ConfigError> {
        match self.optional(section)? {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(ConfigError::SectionNotSet(section.to_string())),
        }
    }

    /// Sections that failed validation in lazy mode.
    pub fn invalid_sections(&self) -> impl Iterator<Item = &str> {
        self.invalid_sections.iter().map(String::as_str)
    }

    /// Validate one schema-backed section.
    pub fn validate_section(&self, section: &str) -> Vec<String> {
        let Some(schema) = sections::schema(section) else {
            return vec![format!("[{section}] has no schema")];
        };
        match self.section_map(section) {
            Ok(map) => schema.validate(&map),
            Err(e) => vec![e.to_string()],
        }
    }

    /// Errors per section: `server` always, other schema sections when set.
    pub fn section_errors(&self) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for schema in SECTIONS {
            if schema.name != "server" && !self.is_set(schema.name) {
                continue;
            }
            let errors = self.validate_section(schema.name);
            if !errors.is_empty() {
                out.insert(schema.name.to_string(), errors);
            }
        }
        out
    }

    /// Every validation error, flattened.
    pub fn validate(&self) -> Vec<String> {
        self.section_errors().into_values().flatten().collect()
    }

    // ------------------------------------------------------------------
    // Worker pinning
    // ------------------------------------------------------------------

    /// Pin `server.hostname` for the rest of the run.
    pub fn pin_hostname(&self, hostname: impl Into<String>) {
        let hostname = hostname.into();
        info!(hostname = hostname.as_str(), "pinning server.hostname");
        *self
            .pinned_hostname
            .lock()
            .expect("pinned hostname mutex poisoned") = Some(hostname);
        self.cache_lock()
            .retain(|key, _| !key.eq_ignore_ascii_case("server.hostname"));
    }

    pub fn pinned_hostname(&self) -> Option<String> {
        self.pinned_hostname
            .lock()
            .expect("pinned hostname mutex poisoned")
            .clone()
    }
}

fn value_to_string(path: &str, value: Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::Type {
            path: path.to_string(),
            expected: "string",
            found: other.to_string(),
        }),
    }
}

fn value_to_bool(path: &str, value: Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::String(s) => casts::cast_bool(&s).map_err(|source| ConfigError::Cast {
            path: path.to_string(),
            source,
        }),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        other => Err(ConfigError::Type {
            path: path.to_string(),
            expected: "boolean",
            found: other.to_string(),
        }),
    }
}

fn value_to_list(path: &str, value: Value) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| value_to_string(path, item))
            .collect(),
        Value::String(s) => casts::cast_list(&s).map_err(|source| ConfigError::Cast {
            path: path.to_string(),
            source,
        }),
        other => Err(ConfigError::Type {
            path: path.to_string(),
            expected: "list",
            found: other.to_string(),
        }),
    }
}
