//! The static table of entity factories.

use super::FactoryError;
use super::producers;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use sutforge_common::{Settings, TargetKind};

/// What a contextual producer can see.
pub struct ProducerContext<'a> {
    pub settings: &'a Settings,
    pub target: TargetKind,
    /// Hostname of `target`, when configured.
    pub hostname: Option<String>,
}

impl ProducerContext<'_> {
    pub fn hostname_or_localhost(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// One field default.
#[derive(Clone)]
pub enum FieldValue {
    Static(Value),
    /// Evaluated per dispatch.
    Lazy(fn() -> Value),
    /// Evaluated per dispatch with the dispatcher's context.
    Contextual(fn(&ProducerContext<'_>) -> Value),
    /// Derived from the spec's `_setup` result.
    FromSetup(fn(&Value) -> Value),
}

impl FieldValue {
    pub fn evaluate(&self, ctx: &ProducerContext<'_>, setup: &Value) -> Value {
        match self {
            Self::Static(value) => value.clone(),
            Self::Lazy(produce) => produce(),
            Self::Contextual(produce) => produce(ctx),
            Self::FromSetup(derive) => derive(setup),
        }
    }
}

impl std::fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(value) => write!(f, "Static({value})"),
            Self::Lazy(_) => f.write_str("Lazy"),
            Self::Contextual(_) => f.write_str("Contextual"),
            Self::FromSetup(_) => f.write_str("FromSetup"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FactorySpec {
    pub fields: Vec<(&'static str, FieldValue)>,
    /// Transport class to use instead of the one matching the factory name.
    pub entity_cls: Option<&'static str>,
    /// Run once per dispatch before any field.
    pub setup: Option<fn() -> Value>,
}

impl FactorySpec {
    fn new() -> Self {
        Self::default()
    }

    fn field(mut self, name: &'static str, value: FieldValue) -> Self {
        self.fields.push((name, value));
        self
    }

    fn fixed(self, name: &'static str, value: impl Into<Value>) -> Self {
        self.field(name, FieldValue::Static(value.into()))
    }

    /// A field the caller normally supplies; present but unset.
    fn unset(self, name: &'static str) -> Self {
        self.field(name, FieldValue::Static(Value::Null))
    }

    fn lazy(self, name: &'static str, produce: fn() -> Value) -> Self {
        self.field(name, FieldValue::Lazy(produce))
    }

    fn contextual(self, name: &'static str, produce: fn(&ProducerContext<'_>) -> Value) -> Self {
        self.field(name, FieldValue::Contextual(produce))
    }

    fn from_setup(self, name: &'static str, derive: fn(&Value) -> Value) -> Self {
        self.field(name, FieldValue::FromSetup(derive))
    }

    fn entity_cls(mut self, cls: &'static str) -> Self {
        self.entity_cls = Some(cls);
        self
    }

    fn setup(mut self, setup: fn() -> Value) -> Self {
        self.setup = Some(setup);
        self
    }
}

#[derive(Debug, Clone)]
pub enum FactoryEntry {
    Spec(FactorySpec),
    Redirect(&'static str),
}

/// A resolved lookup: the spec plus the name it was found under.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub name: &'a str,
    pub spec: &'a FactorySpec,
}

#[derive(Debug, Default)]
pub struct FactoryRegistry {
    entries: BTreeMap<&'static str, FactoryEntry>,
}

static BUILTIN: LazyLock<FactoryRegistry> = LazyLock::new(FactoryRegistry::builtin);

impl FactoryRegistry {
    /// The process-wide table.
    pub fn global() -> &'static FactoryRegistry {
        &BUILTIN
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, entry: FactoryEntry) {
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&FactoryEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follow redirects to a concrete spec.
    pub fn resolve(&self, name: &str) -> Result<Resolved<'_>, FactoryError> {
        let mut current = name;
        let mut seen = vec![name.to_string()];
        loop {
            let Some((key, entry)) = self.entries.get_key_value(current) else {
                return Err(if seen.len() == 1 {
                    FactoryError::Unknown(name.to_string())
                } else {
                    FactoryError::DanglingRedirect {
                        name: name.to_string(),
                        chain: seen.join(" -> "),
                    }
                });
            };
            match entry {
                FactoryEntry::Spec(spec) => {
                    return Ok(Resolved { name: *key, spec });
                }
                FactoryEntry::Redirect(target) => {
                    if seen.iter().any(|s| s == *target) {
                        seen.push(target.to_string());
                        return Err(FactoryError::RedirectLoop(seen.join(" -> ")));
                    }
                    seen.push(target.to_string());
                    current = *target;
                }
            }
        }
    }

    fn builtin() -> Self {
        let mut r = Self::empty();
        let mut spec = |name: &'static str, spec: FactorySpec| r.insert(name, FactoryEntry::Spec(spec));

        spec(
            "activation_key",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .unset("organization-id")
                .unset("lifecycle-environment-id")
                .unset("content-view-id")
                .fixed("unlimited-hosts", true),
        );
        spec(
            "architecture",
            FactorySpec::new()
                .lazy("name", producers::alphanumeric)
                .unset("operatingsystem-ids"),
        );
        spec(
            "compute_resource",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .fixed("provider", "Libvirt")
                .contextual("url", |ctx| {
                    Value::String(format!("qemu+ssh://root@{}/system", ctx.hostname_or_localhost()))
                })
                .unset("location-ids")
                .unset("organization-ids"),
        );
        spec(
            "content_credential",
            FactorySpec::new()
                .lazy("name", producers::name)
                .fixed("content-type", "gpg_key")
                .unset("key")
                .unset("organization-id"),
        );
        spec(
            "content_view",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .unset("organization-id")
                .unset("repository-ids")
                .fixed("composite", false),
        );
        spec(
            "domain",
            FactorySpec::new()
                .lazy("name", producers::domain_name)
                .lazy("description", producers::description)
                .unset("location-ids")
                .unset("organization-ids"),
        );
        spec(
            "filter",
            FactorySpec::new()
                .unset("role-id")
                .unset("permission-ids")
                .unset("search"),
        );
        spec(
            "host_collection",
            FactorySpec::new()
                .lazy("name", producers::name)
                .unset("organization-id"),
        );
        spec(
            "host_group",
            FactorySpec::new()
                .lazy("name", producers::name)
                .unset("organization-ids")
                .unset("location-ids")
                .unset("domain-id")
                .unset("subnet-id")
                .unset("architecture-id")
                .unset("operatingsystem-id")
                .unset("medium-id")
                .unset("partition-table-id")
                .unset("puppet-environment-id")
                .unset("lifecycle-environment-id")
                .unset("content-view-id")
                .unset("content-source-id"),
        );
        spec(
            "http_proxy",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("url", producers::proxy_url)
                .unset("username")
                .unset("password"),
        );
        spec(
            "lifecycle_environment",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .fixed("prior", "Library")
                .unset("organization-id"),
        );
        spec(
            "location",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description),
        );
        spec(
            "medium",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("path", producers::media_path)
                .fixed("os-family", "Redhat")
                .unset("operatingsystem-ids")
                .entity_cls("Media"),
        );
        spec(
            "operatingsystem",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("major", producers::major_version)
                .lazy("minor", producers::minor_version)
                .fixed("family", "Redhat")
                .unset("architecture-ids")
                .unset("medium-ids")
                .unset("partition-table-ids")
                .unset("provisioning-template-ids"),
        );
        spec(
            "org_with_credentials",
            FactorySpec::new()
                .setup(|| Value::String(producers::gen_alpha(producers::NAME_LENGTH)))
                .from_setup("name", Value::clone)
                .from_setup("label", Value::clone)
                .lazy("description", producers::description)
                .entity_cls("Org"),
        );
        spec(
            "partition_table",
            FactorySpec::new()
                .lazy("name", producers::name)
                .fixed("os-family", "Redhat")
                .fixed("layout", "zerombr\nclearpart --all --initlabel\nautopart\n"),
        );
        spec(
            "product",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .lazy("label", producers::alphanumeric)
                .unset("organization-id")
                .unset("gpg-key-id")
                .unset("sync-plan-id"),
        );
        spec(
            "provisioning_template",
            FactorySpec::new()
                .lazy("name", producers::name)
                .fixed("type", "provision")
                .fixed("template", "<%= @host.name %>\n")
                .fixed("locked", false)
                .unset("operatingsystem-ids"),
        );
        spec(
            "puppet_environment",
            FactorySpec::new()
                .lazy("name", producers::name)
                .unset("location-ids")
                .unset("organization-ids")
                .entity_cls("Environment"),
        );
        spec(
            "repository",
            FactorySpec::new()
                .lazy("name", producers::name)
                .fixed("content-type", "yum")
                .unset("product-id")
                .unset("url")
                .fixed("download-policy", "immediate")
                .fixed("publish-via-http", true),
        );
        spec("role", FactorySpec::new().lazy("name", producers::name));
        spec(
            "subnet",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("network", producers::network)
                .fixed("mask", "255.255.255.0")
                .unset("domain-ids")
                .unset("location-ids")
                .unset("organization-ids"),
        );
        spec(
            "sync_plan",
            FactorySpec::new()
                .lazy("name", producers::name)
                .lazy("description", producers::description)
                .fixed("interval", "daily")
                .fixed("enabled", true)
                .lazy("sync-date", producers::today)
                .unset("organization-id"),
        );
        spec(
            "user",
            FactorySpec::new()
                .setup(|| json!({"login": producers::gen_alpha(producers::NAME_LENGTH).to_lowercase()}))
                .from_setup("login", |s| s["login"].clone())
                .from_setup("mail", |s| {
                    Value::String(format!("{}@example.test", s["login"].as_str().unwrap_or("user")))
                })
                .lazy("firstname", producers::name)
                .lazy("lastname", producers::name)
                .lazy("password", producers::password)
                .fixed("auth-source-id", 1)
                .fixed("admin", false)
                .unset("default-organization-id")
                .unset("default-location-id")
                .unset("organization-ids")
                .unset("location-ids"),
        );
        spec(
            "user_group",
            FactorySpec::new()
                .lazy("name", producers::name)
                .unset("role-ids")
                .unset("user-ids"),
        );

        for (alias, target) in [
            ("gpg_key", "content_credential"),
            ("hostgroup", "host_group"),
            ("lifecycle_env", "lifecycle_environment"),
            ("media", "medium"),
            ("org", "org_with_credentials"),
            ("os", "operatingsystem"),
            ("ptable", "partition_table"),
            ("template", "provisioning_template"),
        ] {
            r.insert(alias, FactoryEntry::Redirect(target));
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_redirect_resolves() {
        let registry = FactoryRegistry::global();
        for name in registry.names() {
            assert!(registry.resolve(name).is_ok(), "{name} does not resolve");
        }
    }

    #[test]
    fn test_org_redirect() {
        let resolved = FactoryRegistry::global().resolve("org").unwrap();
        assert_eq!(resolved.name, "org_with_credentials");
        assert_eq!(resolved.spec.entity_cls, Some("Org"));
        assert!(resolved.spec.setup.is_some());
    }

    #[test]
    fn test_unknown_name() {
        let err = FactoryRegistry::global().resolve("spaceship").unwrap_err();
        assert!(matches!(err, FactoryError::Unknown(ref n) if n == "spaceship"));
    }

    #[test]
    fn test_dangling_redirect_names_requested_symbol() {
        let mut registry = FactoryRegistry::empty();
        registry.insert("env", FactoryEntry::Redirect("lce"));
        registry.insert("lce", FactoryEntry::Redirect("gone"));
        let err = registry.resolve("env").unwrap_err();
        assert!(matches!(
            err,
            FactoryError::DanglingRedirect { ref name, ref chain } if name == "env" && chain == "env -> lce -> gone"
        ));
        assert_eq!(err.code(), sutforge_common::ErrorCode::UnknownFactory);
        assert!(err.to_string().starts_with("Unknown factory: env"));
    }

    #[test]
    fn test_redirect_loop_is_reported() {
        let mut registry = FactoryRegistry::empty();
        registry.insert("a", FactoryEntry::Redirect("b"));
        registry.insert("b", FactoryEntry::Redirect("a"));
        let err = registry.resolve("a").unwrap_err();
        assert!(matches!(err, FactoryError::RedirectLoop(ref chain) if chain == "a -> b -> a"));
    }
}
