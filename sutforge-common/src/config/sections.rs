//! Closed section schemas shared by the YAML and legacy settings files.
//!
//! Each section lists every option it understands, whether the option is
//! required once the section is present, and how its raw value is typed.
//! Unknown options are ignored by the legacy reader; validation reports
//! missing required options and values that fail their cast.

use crate::casts;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// How an option's raw value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Str,
    Bool,
    Int,
    /// Integer seconds or a humantime string such as `5m`.
    Duration,
    List,
    Dict,
    LogLevel,
    Url,
}

#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
}

const fn opt(name: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        required: false,
    }
}

const fn req(name: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        required: true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionSchema {
    pub name: &'static str,
    pub options: &'static [OptionSpec],
}

use OptionKind::{Bool, Dict, Int, List, Str, Url};

/// Every schema-backed section, in alphabetical order.
pub const SECTIONS: &[SectionSchema] = &[
    SectionSchema {
        name: "azurerm",
        options: &[
            req("client_id", Str),
            req("client_secret", Str),
            req("subscription_id", Str),
            req("tenant_id", Str),
            req("azure_region", Str),
            opt("ssh_pub_key", Str),
            opt("username", Str),
            opt("password", Str),
            opt("azure_subnet", Str),
        ],
    },
    SectionSchema {
        name: "bugzilla",
        options: &[
            req("url", Url),
            opt("api_key", Str),
            opt("wontfix_lookup", Bool),
        ],
    },
    SectionSchema {
        name: "capsule",
        options: &[
            req("instance_name", Str),
            opt("domain", Str),
            opt("hostname", Str),
        ],
    },
    SectionSchema {
        name: "clients",
        options: &[req("provisioning_server", Str), opt("image_dir", Str)],
    },
    SectionSchema {
        name: "distro",
        options: &[
            opt("image_el6", Str),
            opt("image_el7", Str),
            opt("image_el8", Str),
        ],
    },
    SectionSchema {
        name: "docker",
        options: &[
            opt("external_url", Url),
            opt("private_registry_url", Url),
            opt("private_registry_name", Str),
            opt("private_registry_username", Str),
            opt("private_registry_password", Str),
            opt("docker_image", Str),
        ],
    },
    SectionSchema {
        name: "ec2",
        options: &[
            req("access_key", Str),
            req("secret_key", Str),
            req("region", Str),
            opt("image", Str),
            opt("availability_zone", Str),
            opt("subnet", Str),
            opt("security_groups", List),
            opt("managed_ip", Str),
        ],
    },
    SectionSchema {
        name: "fake_manifest",
        options: &[
            opt("path", Str),
            opt("url", Dict),
            opt("cert_url", Url),
            opt("key_url", Url),
        ],
    },
    SectionSchema {
        name: "gce",
        options: &[
            req("project_id", Str),
            req("client_email", Str),
            req("cert_path", Str),
            req("zone", Str),
            opt("cert_url", Url),
        ],
    },
    SectionSchema {
        name: "http_proxy",
        options: &[
            opt("un_auth_proxy_url", Url),
            opt("auth_proxy_url", Url),
            opt("username", Str),
            opt("password", Str),
        ],
    },
    SectionSchema {
        name: "ipa",
        options: &[
            req("hostname", Str),
            req("username", Str),
            req("password", Str),
            req("basedn", Str),
            opt("grpbasedn", Str),
            opt("user", Str),
            opt("otp_user", Str),
            opt("time_based_secret", Str),
        ],
    },
    SectionSchema {
        name: "ldap",
        options: &[
            req("hostname", Str),
            req("username", Str),
            req("password", Str),
            req("basedn", Str),
            opt("domain", Str),
            opt("grpbasedn", Str),
        ],
    },
    SectionSchema {
        name: "oscap",
        options: &[req("content_path", Str), opt("tailoring_path", Str)],
    },
    SectionSchema {
        name: "performance",
        options: &[
            opt("time_hammer", Bool),
            opt("cdn_address", Url),
            opt("virtual_machines", List),
            opt("fresh_install_savepoint", Str),
            opt("csv_buckets_count", Int),
        ],
    },
    SectionSchema {
        name: "report_portal",
        options: &[
            req("portal_url", Url),
            req("project", Str),
            req("api_key", Str),
            opt("fail_threshold", Int),
        ],
    },
    SectionSchema {
        name: "rhev",
        options: &[
            req("hostname", Str),
            req("username", Str),
            req("password", Str),
            req("datacenter", Str),
            opt("vm_name", Str),
            opt("storage_domain", Str),
            opt("image_os", Str),
            opt("image_arch", Str),
            opt("image_username", Str),
            opt("image_password", Str),
            opt("image_name", Str),
            opt("ca_cert", Str),
        ],
    },
    SectionSchema {
        name: "server",
        options: &[
            opt("hostname", Str),
            opt("hostnames", List),
            req("admin_username", Str),
            req("admin_password", Str),
            opt("scheme", Str),
            opt("port", Int),
            opt("ssh_username", Str),
            opt("ssh_password", Str),
            opt("ssh_key", Str),
            opt("ssh_port", Int),
            opt("version", Str),
            opt("locale", Str),
        ],
    },
    SectionSchema {
        name: "shared_function",
        options: &[
            opt("enabled", Bool),
            opt("storage", Str),
            opt("scope", Str),
            opt("lock_timeout", Int),
            opt("share_timeout", Int),
            opt("redis_host", Str),
            opt("redis_port", Int),
            opt("redis_db", Int),
            opt("redis_password", Str),
            opt("call_retries", Int),
        ],
    },
    SectionSchema {
        name: "ssh_client",
        options: &[
            opt("connection_timeout", OptionKind::Duration),
            opt("command_timeout", OptionKind::Duration),
        ],
    },
    SectionSchema {
        name: "upgrade",
        options: &[
            req("from_version", Str),
            req("to_version", Str),
            opt("upgrade_data", Str),
        ],
    },
    SectionSchema {
        name: "virtwho",
        options: &[
            req("hypervisor_type", Str),
            req("hypervisor_server", Str),
            opt("guest", Str),
            opt("guest_username", Str),
            opt("guest_password", Str),
            opt("sku_vdc_physical", Str),
            opt("sku_vdc_virtual", Str),
        ],
    },
    SectionSchema {
        name: "vmware",
        options: &[
            req("vcenter", Str),
            req("username", Str),
            req("password", Str),
            req("datacenter", Str),
            opt("vm_name", Str),
            opt("image_os", Str),
            opt("image_arch", Str),
            opt("image_username", Str),
            opt("image_password", Str),
            opt("image_name", Str),
        ],
    },
];

/// Look up a schema by section name.
pub fn schema(name: &str) -> Option<&'static SectionSchema> {
    SECTIONS.iter().find(|s| s.name == name)
}

/// Names of every schema-backed section.
pub fn section_names() -> Vec<&'static str> {
    SECTIONS.iter().map(|s| s.name).collect()
}

impl SectionSchema {
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        let lower = name.to_ascii_lowercase();
        self.options.iter().find(|o| o.name == lower)
    }

    pub fn knows(&self, option: &str) -> bool {
        self.option(option).is_some()
    }

    /// Validate a resolved section. Returns one human-readable message per
    /// problem; an empty list means the section is usable.
    pub fn validate(&self, values: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        for spec in self.options {
            match values.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        errors.push(format!("[{}] {} must be provided", self.name, spec.name));
                    }
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    if spec.required {
                        errors.push(format!("[{}] {} must not be empty", self.name, spec.name));
                    }
                }
                Some(value) => {
                    if let Err(reason) = check_value(spec.kind, value) {
                        errors.push(format!("[{}] {}: {}", self.name, spec.name, reason));
                    }
                }
            }
        }

        if self.name == "server"
            && !has_value(values, "hostname")
            && !has_value(values, "hostnames")
        {
            errors.push("[server] one of hostname or hostnames must be provided".to_string());
        }
        errors
    }
}

fn has_value(values: &Map<String, Value>, key: &str) -> bool {
    match values.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn url_regex() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\S+$").expect("valid url regex"))
}

fn check_value(kind: OptionKind, value: &Value) -> Result<(), String> {
    // YAML hands over typed values; only strings need casting.
    let Value::String(raw) = value else {
        return match (kind, value) {
            (Bool, Value::Bool(_)) | (Int, Value::Number(_)) => Ok(()),
            (OptionKind::Duration, Value::Number(n)) if n.is_u64() => Ok(()),
            (List, Value::Array(_)) | (Dict, Value::Object(_)) => Ok(()),
            (Str, Value::Number(_) | Value::Bool(_)) => Ok(()),
            _ => Err(format!("unexpected value {value}")),
        };
    };

    match kind {
        Str => Ok(()),
        Bool => casts::cast_bool(raw).map(|_| ()).map_err(|e| e.to_string()),
        Int => raw
            .trim()
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("'{raw}' is not an integer")),
        OptionKind::Duration => parse_duration(raw).map(|_| ()),
        List => casts::cast_list(raw).map(|_| ()).map_err(|e| e.to_string()),
        Dict => {
            // A bare URL is accepted where a dict of URLs is also allowed.
            if url_regex().is_match(raw.trim()) {
                return Ok(());
            }
            casts::cast_dict(raw).map(|_| ()).map_err(|e| e.to_string())
        }
        OptionKind::LogLevel => casts::cast_log_level(raw)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Url => {
            if url_regex().is_match(raw.trim()) {
                Ok(())
            } else {
                Err(format!("'{raw}' is not a URL"))
            }
        }
    }
}

/// Parse a duration given as integer seconds or a humantime string.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("'{raw}' is not a duration: {e}"))
}

/// Read a duration out of a settings value.
pub fn duration_from_value(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_u64().map(Duration::from_secs),
        Value::String(s) => parse_duration(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_sections_sorted_and_unique() {
        let names = section_names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert!(names.contains(&"server"));
        assert!(names.contains(&"report_portal"));
        assert_eq!(names.len(), 22);
    }

    #[test]
    fn test_option_lookup_case_insensitive() {
        let server = schema("server").unwrap();
        assert!(server.knows("ADMIN_USERNAME"));
        assert!(!server.knows("not_an_option"));
    }

    #[test]
    fn test_validate_server_requires_hostname() {
        let server = schema("server").unwrap();
        let errors = server.validate(&object(json!({
            "admin_username": "admin",
            "admin_password": "changeme",
        })));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("hostname"));

        let ok = server.validate(&object(json!({
            "hostnames": ["a.test", "b.test"],
            "admin_username": "admin",
            "admin_password": "changeme",
        })));
        assert!(ok.is_empty(), "{ok:?}");
    }

    #[test]
    fn test_validate_reports_cast_failures() {
        let shared = schema("shared_function").unwrap();
        let errors = shared.validate(&object(json!({
            "enabled": "maybe",
            "lock_timeout": "soon",
        })));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("enabled")));
        assert!(errors.iter().any(|e| e.contains("lock_timeout")));
    }

    #[test]
    fn test_validate_accepts_typed_yaml_values() {
        let ssh = schema("ssh_client").unwrap();
        assert!(
            ssh.validate(&object(json!({"connection_timeout": 10, "command_timeout": "5m"})))
                .is_empty()
        );
        let errors = ssh.validate(&object(json!({"command_timeout": true})));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_validate_url() {
        let bz = schema("bugzilla").unwrap();
        assert!(bz.validate(&object(json!({"url": "https://bz.test"}))).is_empty());
        assert_eq!(bz.validate(&object(json!({"url": "bz.test"}))).len(), 1);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert!(parse_duration("later").is_err());
        assert_eq!(
            duration_from_value(&json!(30)),
            Some(Duration::from_secs(30))
        );
    }
}
