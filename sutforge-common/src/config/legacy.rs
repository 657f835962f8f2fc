//! Reader for the legacy `robottelo.properties` INI file.
//!
//! The format is the classic one: `[section]` headers, `key = value` or
//! `key: value` lines, and `#` / `;` comment lines. Option names are
//! case-insensitive and stored lowercase. Values are kept as raw strings;
//! typing happens through the casts when a section reads them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conventional filename of the legacy properties file.
pub const LEGACY_FILENAME: &str = "robottelo.properties";

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: option outside of any section")]
    OptionBeforeSection { path: PathBuf, line: usize },

    #[error("{path}:{line}: cannot parse line '{content}'")]
    Syntax {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Parsed INI contents.
#[derive(Debug, Clone, Default)]
pub struct LegacyReader {
    path: Option<PathBuf>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl LegacyReader {
    /// Load and parse a properties file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LegacyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LegacyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = Self::parse_named(&content, path)?;
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }

    /// Parse INI text that did not come from a file.
    pub fn parse(content: &str) -> Result<Self, LegacyError> {
        Self::parse_named(content, Path::new("<memory>"))
    }

    fn parse_named(content: &str, origin: &Path) -> Result<Self, LegacyError> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw_line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                last_key = None;
                continue;
            }

            // Indented lines continue the previous value.
            if raw_line.starts_with([' ', '\t'])
                && let (Some(section), Some(key)) = (&current, &last_key)
                && let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key))
            {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(trimmed);
                continue;
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                last_key = None;
                continue;
            }

            let Some(split_at) = trimmed.find(['=', ':']) else {
                return Err(LegacyError::Syntax {
                    path: origin.to_path_buf(),
                    line: line_no,
                    content: trimmed.to_string(),
                });
            };
            let Some(section) = &current else {
                return Err(LegacyError::OptionBeforeSection {
                    path: origin.to_path_buf(),
                    line: line_no,
                });
            };

            let key = trimmed[..split_at].trim().to_ascii_lowercase();
            let value = trimmed[split_at + 1..].trim().to_string();
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.clone(), value);
            last_key = Some(key);
        }

        Ok(Self {
            path: None,
            sections,
        })
    }

    /// Path the reader was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Names of every section present in the file.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Raw option map for a section.
    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section)
    }

    /// Raw value of an option. The option name is matched case-insensitively.
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&option.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# main server
[server]
hostname = sut.example.test
admin_username: admin
; another comment
admin_password = changeme

[ldap]
HOSTNAME = ldap.example.test
basedn = dc=example,dc=test

[ec2]
";

    #[test]
    fn test_parse_sections_and_options() {
        let reader = LegacyReader::parse(SAMPLE).unwrap();
        assert_eq!(reader.get("server", "hostname"), Some("sut.example.test"));
        assert_eq!(reader.get("server", "admin_username"), Some("admin"));
        assert_eq!(reader.get("ldap", "hostname"), Some("ldap.example.test"));
        assert_eq!(reader.get("ldap", "basedn"), Some("dc=example,dc=test"));
        assert!(reader.has_section("ec2"));
        assert!(reader.section("ec2").unwrap().is_empty());
        assert_eq!(
            reader.sections().collect::<Vec<_>>(),
            vec!["ec2", "ldap", "server"]
        );
    }

    #[test]
    fn test_option_lookup_is_case_insensitive() {
        let reader = LegacyReader::parse(SAMPLE).unwrap();
        assert_eq!(reader.get("server", "HOSTNAME"), Some("sut.example.test"));
        assert_eq!(reader.get("server", "missing"), None);
        assert_eq!(reader.get("missing", "hostname"), None);
    }

    #[test]
    fn test_continuation_lines() {
        let reader = LegacyReader::parse("[clients]\nprovisioning_server =\n  a\n  b\n").unwrap();
        assert_eq!(reader.get("clients", "provisioning_server"), Some("a\nb"));
    }

    #[test]
    fn test_option_before_section_is_error() {
        let err = LegacyReader::parse("hostname = x\n").unwrap_err();
        assert!(matches!(err, LegacyError::OptionBeforeSection { line: 1, .. }));
    }

    #[test]
    fn test_garbage_line_is_error() {
        let err = LegacyReader::parse("[server]\njust words\n").unwrap_err();
        assert!(err.to_string().contains("just words"));
    }

    #[test]
    fn test_from_file_records_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhostname = a.test").unwrap();
        let reader = LegacyReader::from_file(file.path()).unwrap();
        assert_eq!(reader.path(), Some(file.path()));
        assert_eq!(reader.get("server", "hostname"), Some("a.test"));
    }

    #[test]
    fn test_from_missing_file() {
        let err = LegacyReader::from_file("/nonexistent/robottelo.properties").unwrap_err();
        assert!(matches!(err, LegacyError::Io { .. }));
    }
}
