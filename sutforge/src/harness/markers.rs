//! `skip_if_not_set(<section>, ...)`.

use super::HarnessError;
use std::collections::BTreeSet;
use sutforge_common::Settings;
use sutforge_common::config::sections::section_names;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    Run,
    Skip { reason: String },
}

impl MarkerOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Every section name a marker may mention: the schema-backed ones plus
/// whatever the loaded files define.
fn valid_sections(settings: &Settings) -> BTreeSet<String> {
    section_names()
        .into_iter()
        .map(str::to_string)
        .chain(settings.sections())
        .collect()
}

/// Decide whether a test that needs `sections` can run.
///
/// Names outside the known sections are an error, not a skip.
pub fn skip_if_not_set(settings: &Settings, sections: &[&str]) -> Result<MarkerOutcome, HarnessError> {
    let valid = valid_sections(settings);
    if let Some(unknown) = sections.iter().find(|s| !valid.contains(**s)) {
        return Err(HarnessError::UnknownSection {
            section: (*unknown).to_string(),
            valid: valid.into_iter().collect(),
        });
    }

    let missing: Vec<&str> = sections
        .iter()
        .copied()
        .filter(|section| !settings.is_set(section))
        .collect();
    if missing.is_empty() {
        return Ok(MarkerOutcome::Run);
    }
    debug!(?missing, "Sections not configured");
    Ok(MarkerOutcome::Skip {
        reason: format!(
            "Missing the following sections in the configuration: {}",
            missing.join(", ")
        ),
    })
}

/// [`skip_if_not_set`] as a `Result`, for use with `?` at the top of a test.
pub fn require_sections(settings: &Settings, sections: &[&str]) -> Result<(), HarnessError> {
    match skip_if_not_set(settings, sections)? {
        MarkerOutcome::Run => Ok(()),
        MarkerOutcome::Skip { reason } => Err(HarnessError::Skip(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sutforge_common::ErrorCode;

    fn settings() -> Settings {
        Settings::from_yaml_str(
            "server:\n  hostname: sut.example.test\nldap:\n  hostname: ldap.example.test\n  username: cn=admin\n  password: secret\n  basedn: dc=example\n  grpbasedn: ou=groups\nvmware: {}\n",
        )
        .unwrap()
    }

    #[test]
    fn test_all_sections_set_runs() {
        assert_eq!(
            skip_if_not_set(&settings(), &["server", "ldap"]).unwrap(),
            MarkerOutcome::Run
        );
    }

    #[test]
    fn test_missing_sections_are_listed() {
        let outcome = skip_if_not_set(&settings(), &["ldap", "vmware", "ec2"]).unwrap();
        match outcome {
            MarkerOutcome::Skip { reason } => {
                assert!(reason.ends_with("vmware, ec2"), "{reason}");
                assert!(!reason.contains("ldap"));
            }
            MarkerOutcome::Run => panic!("expected a skip"),
        }
    }

    #[test]
    fn test_unknown_section_lists_valid_ones() {
        let err = skip_if_not_set(&settings(), &["server", "spaceship"]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownSection);
        let message = err.to_string();
        assert!(message.starts_with("Unknown section 'spaceship'"));
        assert!(message.contains("ldap"));
        assert!(message.contains("server"));
    }

    #[test]
    fn test_require_sections_turns_skip_into_error() {
        let err = require_sections(&settings(), &["gce"]).unwrap_err();
        assert!(err.is_skip());
        assert_eq!(err.code(), ErrorCode::SkipRequested);
        assert!(require_sections(&settings(), &["server"]).is_ok());
    }
}
