//! Settings providers.
//!
//! A provider answers dotted-path lookups from one source. The settings
//! store walks them in order (environment, YAML, legacy INI) and the first
//! one that yields a value wins.

use super::ConfigError;
use crate::config::sections;
use crate::config::{ConfigSource, EnvParser, LegacyReader, Sourced};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Primary YAML settings file name.
pub const YAML_FILENAME: &str = "settings.yaml";
/// Per-run overlay applied after the main tree.
pub const LOCAL_OVERLAY: &str = "settings.local.yaml";

/// A single source of settings values.
pub trait Provider: Send + Sync {
    /// Short name used in "tried" lists of lookup errors.
    fn name(&self) -> &str;

    /// Resolve a path given as segments. The last segment is matched
    /// case-insensitively.
    fn lookup(&self, path: &[&str]) -> Option<Sourced<Value>>;

    /// Top-level sections this provider knows about.
    fn sections(&self) -> Vec<String>;
}

/// Find a key exactly, falling back to a case-insensitive match.
pub(crate) fn get_ci<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Walk a JSON tree. Intermediate segments match exactly, the last one
/// case-insensitively.
pub(crate) fn walk<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut node = root;
    for segment in parents {
        node = node.as_object()?.get(*segment)?;
    }
    get_ci(node.as_object()?, last)
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key;
/// anything else replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// Environment
// ============================================================================

/// `SUTFORGE_<SECTION>_<OPTION>` overrides.
#[derive(Debug, Default)]
pub struct EnvProvider;

impl EnvProvider {
    pub fn new() -> Self {
        Self
    }

    /// Apply overrides for every leaf below `path` to an already resolved
    /// mapping.
    pub fn overlay(&self, path: &[&str], value: &mut Value) {
        let Value::Object(map) = value else {
            return;
        };
        for (key, child) in map.iter_mut() {
            let mut child_path: Vec<&str> = path.to_vec();
            child_path.push(key.as_str());
            if child.is_object() {
                self.overlay(&child_path, child);
            } else if let Some(found) = self.lookup(&child_path) {
                *child = found.value;
            }
        }
    }
}

impl Provider for EnvProvider {
    fn name(&self) -> &str {
        "environment"
    }

    fn lookup(&self, path: &[&str]) -> Option<Sourced<Value>> {
        let (option, section) = path.split_last()?;
        if section.is_empty() {
            return None;
        }
        EnvParser::new()
            .get_override(&section.join("."), option)
            .map(|found| found.map(Value::String))
    }

    fn sections(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// YAML
// ============================================================================

/// The merged YAML tree.
#[derive(Debug, Default)]
pub struct YamlProvider {
    root: Value,
    /// Last file that contributed to each top-level key.
    origins: BTreeMap<String, PathBuf>,
    files: Vec<PathBuf>,
}

impl YamlProvider {
    /// Files loaded from a settings directory, in merge order.
    pub fn discover(settings_dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let primary = settings_dir.join(YAML_FILENAME);
        if primary.is_file() {
            files.push(primary);
        }
        files.extend(glob_sorted(settings_dir, "conf/*.yaml"));
        let local = settings_dir.join(LOCAL_OVERLAY);
        if local.is_file() {
            files.push(local);
        }
        files.extend(glob_sorted(settings_dir, ".secrets*.yaml"));
        files
    }

    /// Load and merge every discovered file under `settings_dir`.
    pub fn load(settings_dir: &Path) -> Result<Self, ConfigError> {
        let mut provider = Self {
            root: Value::Object(Map::new()),
            ..Self::default()
        };
        for file in Self::discover(settings_dir) {
            let content = fs::read_to_string(&file).map_err(|source| ConfigError::Io {
                path: file.clone(),
                source,
            })?;
            provider.merge_str(&content, &file)?;
        }
        Ok(provider)
    }

    /// Build a provider from a single YAML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut provider = Self {
            root: Value::Object(Map::new()),
            ..Self::default()
        };
        provider.merge_str(content, Path::new("<memory>"))?;
        Ok(provider)
    }

    /// Merge another document over the current tree.
    pub fn merge_str(&mut self, content: &str, origin: &Path) -> Result<(), ConfigError> {
        let parsed: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml_ng::from_str(content).map_err(|source| ConfigError::Yaml {
                path: origin.to_path_buf(),
                source,
            })?
        };
        let Value::Object(map) = parsed else {
            debug!(file = %origin.display(), "settings file has no mapping at top level, skipped");
            return Ok(());
        };

        for key in map.keys() {
            self.origins.insert(key.clone(), origin.to_path_buf());
        }
        deep_merge(&mut self.root, Value::Object(map));
        self.files.push(origin.to_path_buf());
        debug!(file = %origin.display(), "merged settings file");
        Ok(())
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn glob_sorted(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = dir.join(pattern);
    let Some(full) = full.to_str() else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = match glob::glob(full) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            debug!(pattern = full, error = %e, "invalid settings glob");
            Vec::new()
        }
    };
    found.sort();
    found
}

impl Provider for YamlProvider {
    fn name(&self) -> &str {
        "yaml"
    }

    fn lookup(&self, path: &[&str]) -> Option<Sourced<Value>> {
        let value = walk(&self.root, path)?;
        if value.is_null() {
            return None;
        }
        let origin = path
            .first()
            .and_then(|top| self.origins.get(*top))
            .cloned()
            .unwrap_or_else(|| PathBuf::from(YAML_FILENAME));
        Some(Sourced::new(value.clone(), ConfigSource::Yaml(origin)))
    }

    fn sections(&self) -> Vec<String> {
        self.root
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Legacy INI
// ============================================================================

/// The legacy `robottelo.properties` file, filtered through the section
/// schemas.
#[derive(Debug)]
pub struct LegacyProvider {
    reader: LegacyReader,
    path: PathBuf,
}

impl LegacyProvider {
    pub fn new(reader: LegacyReader) -> Self {
        let path = reader
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(crate::config::LEGACY_FILENAME));
        for section in reader.sections() {
            let (Some(schema), Some(options)) = (sections::schema(section), reader.section(section))
            else {
                continue;
            };
            for option in options.keys().filter(|o| !schema.knows(o)) {
                debug!(section, option = option.as_str(), "ignoring unknown legacy option");
            }
        }
        Self { reader, path }
    }

    fn section_value(&self, section: &str) -> Option<Value> {
        let options = self.reader.section(section)?;
        let schema = sections::schema(section);
        let map: Map<String, Value> = options
            .iter()
            .filter(|(key, _)| schema.is_none_or(|s| s.knows(key)))
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        Some(Value::Object(map))
    }

    /// Read one option straight from the file, bypassing every other
    /// provider.
    pub fn read_raw(&self, section: &str, option: &str) -> Option<&str> {
        self.reader.get(section, option)
    }
}

impl Provider for LegacyProvider {
    fn name(&self) -> &str {
        "legacy"
    }

    fn lookup(&self, path: &[&str]) -> Option<Sourced<Value>> {
        // The legacy file keeps the SSH client options in their own section.
        let path: Vec<&str> = match path {
            ["server", "ssh_client", rest @ ..] => {
                std::iter::once("ssh_client").chain(rest.iter().copied()).collect()
            }
            _ => path.to_vec(),
        };
        let source = ConfigSource::Legacy(self.path.clone());
        match path.as_slice() {
            [section] => self
                .section_value(section)
                .map(|v| Sourced::new(v, source)),
            [section, option] => {
                let value = self.section_value(section)?;
                get_ci(value.as_object()?, option)
                    .cloned()
                    .map(|v| Sourced::new(v, source))
            }
            _ => None,
        }
    }

    fn sections(&self) -> Vec<String> {
        self.reader.sections().map(str::to_string).collect()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;
    use std::env;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_deep_merge() {
        let mut base = json!({"server": {"hostname": "a", "port": 443}, "list": [1, 2]});
        deep_merge(
            &mut base,
            json!({"server": {"hostname": "b"}, "list": [3], "new": true}),
        );
        assert_eq!(
            base,
            json!({"server": {"hostname": "b", "port": 443}, "list": [3], "new": true})
        );
    }

    #[test]
    fn test_yaml_lookup_last_segment_case_insensitive() {
        let yaml = YamlProvider::parse("server:\n  HostName: sut.test\n").unwrap();
        let found = yaml.lookup(&["server", "hostname"]).unwrap();
        assert_eq!(found.value, json!("sut.test"));
        assert!(yaml.lookup(&["SERVER", "hostname"]).is_none());
    }

    #[test]
    fn test_yaml_discover_order_and_overlays() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("conf")).unwrap();
        fs::write(dir.path().join(YAML_FILENAME), "server:\n  hostname: main\n  port: 1\n").unwrap();
        fs::write(dir.path().join("conf/b.yaml"), "server:\n  port: 2\n").unwrap();
        fs::write(dir.path().join("conf/a.yaml"), "ldap:\n  hostname: ldap\n").unwrap();
        fs::write(dir.path().join(LOCAL_OVERLAY), "server:\n  hostname: local\n").unwrap();
        fs::write(dir.path().join(".secrets.yaml"), "server:\n  admin_password: s3cr3t\n").unwrap();

        let files = YamlProvider::discover(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["settings.yaml", "a.yaml", "b.yaml", "settings.local.yaml", ".secrets.yaml"]
        );

        let yaml = YamlProvider::load(dir.path()).unwrap();
        assert_eq!(yaml.lookup(&["server", "hostname"]).unwrap().value, json!("local"));
        assert_eq!(yaml.lookup(&["server", "port"]).unwrap().value, json!(2));
        assert_eq!(
            yaml.lookup(&["server", "admin_password"]).unwrap().value,
            json!("s3cr3t")
        );
        let mut sections = yaml.sections();
        sections.sort();
        assert_eq!(sections, vec!["ldap", "server"]);
    }

    #[test]
    fn test_yaml_parse_error_names_file() {
        let err = YamlProvider::parse("server: [unclosed\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_legacy_filters_unknown_options() {
        let reader = LegacyReader::parse(
            "[server]\nhostname = h\nbogus = 1\n[ssh_client]\ncommand_timeout = 30\n[robottelo]\nlocale = C\n",
        )
        .unwrap();
        let legacy = LegacyProvider::new(reader);
        let server = legacy.lookup(&["server"]).unwrap().value;
        assert_eq!(server, json!({"hostname": "h"}));
        assert_eq!(legacy.read_raw("server", "bogus"), Some("1"));
        assert_eq!(
            legacy.lookup(&["server", "ssh_client", "command_timeout"]).unwrap().value,
            json!("30")
        );
        // Sections without a schema pass through untouched.
        assert_eq!(legacy.lookup(&["robottelo", "locale"]).unwrap().value, json!("C"));
    }

    #[test]
    fn test_env_provider_lookup_and_overlay() {
        let _guard = env_test_lock();
        // SAFETY: Tests are serialized via env_test_lock
        unsafe { env::set_var("SUTFORGE_ENVTEST_PORT", "8443") };

        let envp = EnvProvider::new();
        assert!(envp.lookup(&["envtest"]).is_none());
        let port = envp.lookup(&["envtest", "port"]).unwrap();
        assert_eq!(port.value, json!("8443"));
        assert_eq!(port.env_var.as_deref(), Some("SUTFORGE_ENVTEST_PORT"));

        let mut server = json!({"hostname": "h", "port": 443});
        envp.overlay(&["envtest"], &mut server);
        assert_eq!(server, json!({"hostname": "h", "port": "8443"}));

        // SAFETY: Tests are serialized via env_test_lock
        unsafe { env::remove_var("SUTFORGE_ENVTEST_PORT") };
    }
}
