//! `make_<name>` dispatch.
//!
//! A dispatch resolves the factory (following redirects), evaluates the
//! spec's `_setup` hook and field producers, strips internal keys, merges
//! the caller's overrides and sends one `create` request to the class the
//! spec names. Transport failures come back as [`FactoryError::Failure`]
//! with the option map pretty-printed ahead of the SUT's message.

use super::FactoryError;
use super::registry::{FactoryRegistry, FactorySpec, ProducerContext};
use crate::transport::{Action, Options, Request, Transport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Weak};
use sutforge_common::{Credentials, EntityHandle, Settings, TargetKind};
use tracing::{debug, warn};

/// Key the `_setup` result is stashed under while fields are evaluated.
pub const SETUP_RESULT_KEY: &str = "_setup_res";

/// Caller-supplied values for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub options: Options,
    pub credentials: Option<Credentials>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn as_user(mut self, login: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(login, password));
        self
    }
}

impl From<Options> for Overrides {
    fn from(options: Options) -> Self {
        Self {
            options,
            credentials: None,
        }
    }
}

/// Options and class for a dispatch, before the transport is called.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub factory: String,
    pub class: String,
    pub options: Options,
    pub credentials: Option<Credentials>,
}

fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Builds entities by factory name against one transport.
///
/// The transport is held weakly: a dispatcher outliving its transport set
/// fails with [`FactoryError::TransportGone`] instead of keeping a stale
/// connection alive.
#[derive(Clone)]
pub struct FactoryDispatcher {
    transport: Weak<dyn Transport>,
    settings: Arc<Settings>,
    target: TargetKind,
    registry: &'static FactoryRegistry,
}

impl FactoryDispatcher {
    pub fn new(transport: &Arc<dyn Transport>, settings: Arc<Settings>, target: TargetKind) -> Self {
        Self {
            transport: Arc::downgrade(transport),
            settings,
            target,
            registry: FactoryRegistry::global(),
        }
    }

    pub fn with_registry(mut self, registry: &'static FactoryRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    pub fn registry(&self) -> &'static FactoryRegistry {
        self.registry
    }

    fn transport(&self, factory: &str) -> Result<Arc<dyn Transport>, FactoryError> {
        self.transport
            .upgrade()
            .ok_or_else(|| FactoryError::TransportGone(factory.to_string()))
    }

    fn context(&self) -> ProducerContext<'_> {
        let hostname = match self.settings.get_opt_string(self.target.hostname_path()) {
            Ok(hostname) => hostname,
            Err(e) => {
                warn!(target_kind = %self.target, error = %e, "No hostname for producers");
                None
            }
        };
        ProducerContext {
            settings: &self.settings,
            target: self.target,
            hostname,
        }
    }

    /// Evaluate every default of `spec` into an option map.
    fn evaluate(&self, spec: &FactorySpec) -> Options {
        let ctx = self.context();
        let mut options = Options::new();
        if let Some(setup) = spec.setup {
            options.insert(SETUP_RESULT_KEY.to_string(), setup());
        }
        let setup_result = options.get(SETUP_RESULT_KEY).cloned().unwrap_or(Value::Null);
        for (name, value) in &spec.fields {
            options.insert((*name).to_string(), value.evaluate(&ctx, &setup_result));
        }
        options.retain(|key, _| !key.starts_with('_'));
        options
    }

    fn resolve_class(
        &self,
        factory: &str,
        spec: &FactorySpec,
        classes: &[&'static str],
    ) -> Result<&'static str, FactoryError> {
        let wanted = squash(spec.entity_cls.unwrap_or(factory));
        classes
            .iter()
            .copied()
            .find(|class| squash(class) == wanted)
            .ok_or_else(|| FactoryError::ClassNotFound {
                factory: factory.to_string(),
                available: classes.join(", "),
            })
    }

    /// Resolve and evaluate a dispatch without calling the transport.
    pub fn prepare(&self, name: &str, overrides: Overrides) -> Result<Prepared, FactoryError> {
        let resolved = self.registry.resolve(name)?;
        let mut options = self.evaluate(resolved.spec);
        for (key, value) in overrides.options {
            options.insert(key, value);
        }
        let classes = self.transport(name)?.classes();
        let class = self.resolve_class(resolved.name, resolved.spec, &classes)?;
        Ok(Prepared {
            factory: name.to_string(),
            class: class.to_string(),
            options,
            credentials: overrides.credentials,
        })
    }

    /// Create one entity through the named factory.
    pub async fn make(&self, name: &str, overrides: Overrides) -> Result<EntityHandle, FactoryError> {
        let prepared = self.prepare(name, overrides)?;
        let transport = self.transport(name)?;
        debug!(
            factory = name,
            class = %prepared.class,
            transport = transport.kind(),
            "Dispatching factory"
        );

        let request = Request::new(prepared.class.clone(), Action::Create)
            .with_options(prepared.options.clone())
            .with_credentials(prepared.credentials);
        let wrap = |source: TransportError| {
            let options = serde_json::to_string_pretty(&prepared.options).unwrap_or_default();
            failure(name, options, source)
        };

        let result = transport.call(request).await.map_err(wrap)?;
        let output = result.output.clone();
        result.into_handle().ok_or_else(|| {
            wrap(TransportError::Parse {
                context: format!("{} create", prepared.class),
                reason: format!("expected a single record, got {output}"),
            })
        })
    }
}

fn failure(factory: &str, options: String, source: TransportError) -> FactoryError {
    let message = source.sut_message();
    warn!(factory, error = %message, "Factory create failed");
    FactoryError::Failure {
        factory: factory.to_string(),
        options,
        message,
        source,
    }
}

/// Typed entry points, one per builtin factory name.
macro_rules! factory_methods {
    ($($method:ident => $name:literal),* $(,)?) => {
        impl FactoryDispatcher {
            $(
                #[doc = concat!("`make(\"", $name, "\", overrides)`")]
                pub async fn $method(&self, overrides: Overrides) -> Result<EntityHandle, FactoryError> {
                    self.make($name, overrides).await
                }
            )*
        }
    };
}

factory_methods! {
    make_activation_key => "activation_key",
    make_architecture => "architecture",
    make_compute_resource => "compute_resource",
    make_content_credential => "content_credential",
    make_content_view => "content_view",
    make_domain => "domain",
    make_filter => "filter",
    make_gpg_key => "gpg_key",
    make_host_collection => "host_collection",
    make_hostgroup => "hostgroup",
    make_http_proxy => "http_proxy",
    make_lifecycle_environment => "lifecycle_environment",
    make_location => "location",
    make_medium => "medium",
    make_org => "org",
    make_org_with_credentials => "org_with_credentials",
    make_os => "os",
    make_partition_table => "partition_table",
    make_product => "product",
    make_puppet_environment => "puppet_environment",
    make_repository => "repository",
    make_role => "role",
    make_subnet => "subnet",
    make_sync_plan => "sync_plan",
    make_template => "template",
    make_user => "user",
    make_user_group => "user_group",
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::registry::{FactoryEntry, FieldValue};
    use crate::transport::mock::MockSut;
    use serde_json::json;
    use std::sync::LazyLock;

    fn settings() -> Arc<Settings> {
        Arc::new(
            Settings::from_yaml_str(
                "server:\n  hostname: sut.example.test\n  admin_username: admin\n  admin_password: changeme\n",
            )
            .unwrap(),
        )
    }

    fn dispatcher(sut: &Arc<MockSut>) -> (Arc<dyn Transport>, FactoryDispatcher) {
        let transport: Arc<dyn Transport> = sut.clone();
        let dispatcher = FactoryDispatcher::new(&transport, settings(), TargetKind::Server);
        (transport, dispatcher)
    }

    #[test]
    fn test_squash() {
        assert_eq!(squash("org_with-credentials"), "orgwithcredentials");
        assert_eq!(squash("ActivationKey"), "activationkey");
    }

    #[test]
    fn test_every_builtin_evaluates_without_producers_left() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        for name in FactoryRegistry::global().names() {
            let prepared = dispatcher.prepare(name, Overrides::new()).unwrap();
            assert!(
                prepared.options.keys().all(|k| !k.starts_with('_')),
                "{name} leaked an internal key"
            );
        }
    }

    #[test]
    fn test_setup_result_shared_by_fields() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        let prepared = dispatcher.prepare("user", Overrides::new()).unwrap();
        let login = prepared.options["login"].as_str().unwrap().to_string();
        assert_eq!(prepared.options["mail"], json!(format!("{login}@example.test")));

        let org = dispatcher.prepare("org", Overrides::new()).unwrap();
        assert_eq!(org.class, "Org");
        assert_eq!(org.options["name"], org.options["label"]);
    }

    #[test]
    fn test_overrides_win_and_nulls_are_kept() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        let prepared = dispatcher
            .prepare(
                "subnet",
                Overrides::new().set("mask", "255.255.0.0").set("description", ""),
            )
            .unwrap();
        assert_eq!(prepared.options["mask"], json!("255.255.0.0"));
        assert_eq!(prepared.options["description"], json!(""));
        assert_eq!(prepared.options["domain-ids"], Value::Null);
    }

    #[test]
    fn test_contextual_producer_sees_target_hostname() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        let prepared = dispatcher.prepare("compute_resource", Overrides::new()).unwrap();
        assert_eq!(prepared.options["url"], json!("qemu+ssh://root@sut.example.test/system"));
    }

    #[test]
    fn test_redirect_without_hint_matches_target_name() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        assert_eq!(dispatcher.prepare("os", Overrides::new()).unwrap().class, "OperatingSystem");
        assert_eq!(dispatcher.prepare("hostgroup", Overrides::new()).unwrap().class, "HostGroup");
        assert_eq!(dispatcher.prepare("gpg_key", Overrides::new()).unwrap().class, "ContentCredential");
    }

    #[test]
    fn test_unknown_factory_names_symbol() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        let err = dispatcher.prepare("make_believe", Overrides::new()).unwrap_err();
        assert!(err.to_string().contains("make_believe"));
        assert_eq!(err.code(), sutforge_common::ErrorCode::UnknownFactory);
    }

    #[test]
    fn test_class_not_found() {
        static REGISTRY: LazyLock<FactoryRegistry> = LazyLock::new(|| {
            let mut registry = FactoryRegistry::empty();
            registry.insert(
                "spaceship",
                FactoryEntry::Spec(FactorySpec {
                    fields: vec![("name", FieldValue::Static(json!("x")))],
                    ..Default::default()
                }),
            );
            registry
        });
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        let err = dispatcher
            .with_registry(&REGISTRY)
            .prepare("spaceship", Overrides::new())
            .unwrap_err();
        assert!(matches!(err, FactoryError::ClassNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failure_dumps_options_then_message() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        sut.fail_next(
            "Domain",
            Some(Action::Create),
            TransportError::Cli {
                status: 65,
                stderr: "Could not create the domain:\n  Name has already been taken\n".into(),
                command: "hammer domain create".into(),
            },
        );
        let err = dispatcher
            .make_domain(Overrides::new().set("name", "dup.test"))
            .await
            .unwrap_err();
        let message = err.to_string();
        let options_at = message.find("\"name\": \"dup.test\"").unwrap();
        let sut_at = message.find("Name has already been taken").unwrap();
        assert!(options_at < sut_at);
        assert!(matches!(err.transport_error(), Some(TransportError::Cli { status: 65, .. })));
    }

    #[tokio::test]
    async fn test_credentials_reach_the_transport() {
        let sut = Arc::new(MockSut::new());
        let (_transport, dispatcher) = dispatcher(&sut);
        dispatcher
            .make_location(Overrides::new().as_user("viewer", "pw"))
            .await
            .unwrap();
        let request = sut.requests_for("Location", &Action::Create).pop().unwrap();
        assert_eq!(request.credentials.unwrap().login, "viewer");
    }

    #[tokio::test]
    async fn test_dropped_transport() {
        let sut = Arc::new(MockSut::new());
        let (transport, dispatcher) = dispatcher(&sut);
        drop(transport);
        drop(sut);
        let err = dispatcher.make_role(Overrides::new()).await.unwrap_err();
        assert!(matches!(err, FactoryError::TransportGone(_)));
    }
}
