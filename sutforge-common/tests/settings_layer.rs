//! End-to-end tests for `configure` over real settings directories.

#![allow(unsafe_code)]

use serde_json::json;
use serial_test::serial;
use std::fs;
use std::path::Path;
use sutforge_common::config::ConfigSource;
use sutforge_common::settings::{ConfigError, ConfigureOptions, configure};
use sutforge_common::testing::init_test_logging;

const VALID_YAML: &str = "\
server:
  hostname: sut.example.test
  admin_username: admin
  admin_password: changeme
";

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn missing_directory_is_improperly_configured() {
    init_test_logging();
    let err = configure(&ConfigureOptions::new("/definitely/not/a/settings/dir")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { .. }));
    assert!(err.to_string().contains("/definitely/not/a/settings/dir"));
    assert_eq!(err.code().code_string(), "SFG-E001");
}

#[test]
fn missing_directory_is_tolerated_in_lazy_mode() {
    init_test_logging();
    let settings =
        configure(&ConfigureOptions::new("/definitely/not/a/settings/dir").lazy(true)).unwrap();
    assert!(!settings.is_set("server"));
}

#[test]
fn empty_directory_names_the_primary_file() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let err = configure(&ConfigureOptions::new(dir.path())).unwrap_err();
    match err {
        ConfigError::Missing { path } => assert!(path.ends_with("settings.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn strict_mode_aggregates_every_section_error() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "settings.yaml",
        "server:\n  hostname: h\nldap:\n  hostname: l\n",
    );

    let err = configure(&ConfigureOptions::new(dir.path())).unwrap_err();
    let ConfigError::Invalid { errors } = &err else {
        panic!("expected Invalid, got {err}");
    };
    assert!(errors.len() >= 4, "{errors:?}");
    let rendered = err.to_string();
    assert!(rendered.starts_with("Improperly configured:\n"));
    assert_eq!(rendered.lines().count(), errors.len() + 1);
}

#[test]
fn lazy_mode_degrades_only_the_failing_section() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "settings.yaml",
        &format!("{VALID_YAML}ldap:\n  hostname: l\n"),
    );

    let settings = configure(&ConfigureOptions::new(dir.path()).lazy(true)).unwrap();
    assert!(settings.is_set("server"));
    assert!(!settings.is_set("ldap"));
    assert_eq!(settings.invalid_sections().collect::<Vec<_>>(), vec!["ldap"]);
}

#[test]
fn yaml_overlays_and_legacy_file_combine() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "settings.yaml", VALID_YAML);
    write(dir.path(), "conf/ldap.yaml", "ldap:\n  hostname: ldap.test\n  username: u\n  password: p\n  basedn: dc=test\n");
    write(dir.path(), "settings.local.yaml", "server:\n  port: 8443\n");
    write(
        dir.path(),
        "robottelo.properties",
        "[vmware]\nvcenter = vc.test\nusername = u\npassword = p\ndatacenter = dc\nunknown = dropped\n",
    );

    let settings = configure(&ConfigureOptions::new(dir.path())).unwrap();
    assert_eq!(settings.get_value("ldap.hostname").unwrap(), json!("ldap.test"));
    assert_eq!(settings.get_opt_u64("server.port").unwrap(), Some(8443));
    assert_eq!(settings.get_value("vmware.vcenter").unwrap(), json!("vc.test"));
    assert!(settings.get_value("vmware.unknown").is_err());
    assert!(matches!(
        settings.source_of("vmware.vcenter").unwrap(),
        ConfigSource::Legacy(_)
    ));
    assert_eq!(
        settings.sections(),
        vec!["ldap".to_string(), "server".to_string(), "vmware".to_string()]
    );
    assert!(settings.validate().is_empty());
}

#[test]
#[serial]
fn environment_override_wins_over_files() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "settings.yaml", VALID_YAML);

    // SAFETY: serialized with #[serial]; no other test in this binary reads
    // this variable.
    unsafe { std::env::set_var("SUTFORGE_SERVER_ADMIN_USERNAME", "operator") };
    let settings = configure(&ConfigureOptions::new(dir.path())).unwrap();
    let value = settings.get_value("server.admin_username");
    let node_value = settings.get_value("server");
    // SAFETY: as above.
    unsafe { std::env::remove_var("SUTFORGE_SERVER_ADMIN_USERNAME") };

    assert_eq!(value.unwrap(), json!("operator"));
    assert_eq!(node_value.unwrap()["admin_username"], json!("operator"));
}
