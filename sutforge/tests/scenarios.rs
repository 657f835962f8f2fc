//! End-to-end scenarios against the in-memory SUT.

mod common;

use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use sutforge::factory::Overrides;
use sutforge::scoped::{ScopedError, with_setting};
use sutforge::setup::{CustomRepoOptions, RHEL7_SERVER, RedHatRepoOptions};
use sutforge::tasks::poll::SYNC_TASK_LABEL;
use sutforge::transport::{Action, HammerCommand};
use tempfile::TempDir;

#[tokio::test]
async fn subnet_defaults_are_evaluated_before_the_call() {
    let dir = TempDir::new().unwrap();
    let sut = common::sut();
    let transport = common::transport(&sut);
    let dispatcher = common::dispatcher(&transport, common::settings(dir.path()));

    let subnet = dispatcher.make_subnet(Overrides::new()).await.unwrap();

    let request = sut.requests_for("Subnet", &Action::Create).pop().unwrap();
    let name = request.options["name"].as_str().unwrap();
    assert!(!name.is_empty());
    assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
    let network = request.options["network"].as_str().unwrap();
    assert!(Regex::new(r"^\d+\.\d+\.\d+\.0$").unwrap().is_match(network), "{network}");
    assert_eq!(request.options["mask"], json!("255.255.255.0"));

    assert!(subnet.id().is_some());
    assert_eq!(subnet.name(), Some(name));
}

#[tokio::test]
async fn org_factory_creates_an_org() {
    let dir = TempDir::new().unwrap();
    let sut = common::sut();
    let transport = common::transport(&sut);
    let dispatcher = common::dispatcher(&transport, common::settings(dir.path()));

    let org = dispatcher.make_org(Overrides::new()).await.unwrap();

    assert_eq!(sut.requests_for("Org", &Action::Create).len(), 1);
    assert!(sut.requests().iter().all(|r| r.class != "OrgWithCredentials"));
    assert!(sut.record("Org", org.id().unwrap()).is_some());
}

#[derive(Debug, thiserror::Error)]
enum ScenarioError {
    #[error("scenario failed on purpose")]
    Raised,
    #[error(transparent)]
    Scoped(#[from] ScopedError),
}

#[tokio::test]
async fn setting_override_is_undone_when_the_body_fails() {
    let sut = common::sut();
    let client = common::client(&sut);
    let before = sut.setting_value("foreman_url");

    let inner = sut.clone();
    let err = with_setting(&client, "foreman_url=http://example.test", || async move {
        assert_eq!(inner.setting_value("foreman_url"), Some(json!("http://example.test")));
        Err::<(), _>(ScenarioError::Raised)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ScenarioError::Raised));
    assert_eq!(sut.setting_value("foreman_url"), before);
    assert_ne!(sut.setting_value("foreman_url"), Some(json!("http://example.test")));
}

#[tokio::test]
async fn custom_repo_setup_end_to_end() {
    let dir = TempDir::new().unwrap();
    let sut = common::sut();
    let setup = common::orchestrator(&sut, dir.path());

    let bundle = setup
        .setup_org_for_a_custom_repo(&CustomRepoOptions::new("http://mirror.example.test/zoo/"))
        .await
        .unwrap();

    for class in ["Org", "LifecycleEnvironment", "ContentView", "ActivationKey"] {
        assert_eq!(sut.requests_for(class, &Action::Create).len(), 1, "{class}");
    }

    let syncs: Vec<_> = sut.tasks().into_iter().filter(|t| t.label == SYNC_TASK_LABEL).collect();
    assert_eq!(syncs.len(), 1);
    assert!(syncs[0].succeeded());

    let promotes = sut.requests_for("ContentViewVersion", &Action::Custom("promote".into()));
    assert_eq!(promotes.len(), 1);
    let version = sut
        .records("ContentViewVersion")
        .into_iter()
        .find(|v| v.get_u64("content-view-id") == Some(bundle.content_view_id))
        .unwrap();
    assert!(
        version
            .get("environment-ids")
            .and_then(Value::as_array)
            .unwrap()
            .contains(&json!(bundle.lifecycle_environment_id))
    );

    let ak = sut.record("ActivationKey", bundle.activationkey_id).unwrap();
    assert_eq!(ak.get("subscriptions").and_then(Value::as_array).map(Vec::len), Some(1));

    let ids = [
        bundle.activationkey_id,
        bundle.content_view_id,
        bundle.lifecycle_environment_id,
        bundle.organization_id,
        bundle.product_id,
        bundle.repository_id,
    ];
    assert!(ids.iter().all(|id| *id > 0));
}

#[test]
fn hammer_command_serialisation_edge_cases() {
    let options = json!({
        "name": null,
        "locked": true,
        "skip": false,
        "domains": ["a", "b"],
        "desc": "has \"quote\" and space",
    });
    let command = HammerCommand::new("template", "create")
        .options(options.as_object().cloned().unwrap())
        .build();

    assert!(command.contains("--locked"));
    assert!(command.contains("--domains=\"a,b\""));
    assert!(command.contains(r#"--desc="has \"quote\" and space""#));
    assert!(!command.contains("--name"));
    assert!(!command.contains("--skip"));
}

#[tokio::test]
async fn manifest_uploads_for_one_org_are_serialised() {
    let dir = TempDir::new().unwrap();
    let sut = common::sut();
    let org = sut.seed("Org", json!({"name": "shared-org"}));

    // Two workers with their own orchestrators share the lock directory.
    let worker_a = common::orchestrator(&sut, dir.path());
    let worker_b = common::orchestrator(&sut, dir.path());
    let opts = RedHatRepoOptions {
        organization_id: Some(org),
        ..RedHatRepoOptions::new(RHEL7_SERVER)
    };

    let (a, b) = tokio::join!(
        worker_a.setup_org_for_a_rh_repo(&opts),
        worker_b.setup_org_for_a_rh_repo(&opts)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(sut.upload_count(org), 2);
    assert_eq!(sut.max_concurrent_uploads(org), 1);

    let aks: BTreeSet<u64> = [a.activationkey_id, b.activationkey_id].into();
    assert_eq!(aks.len(), 2);
    for ak in aks {
        let key = sut.record("ActivationKey", ak).unwrap();
        let subs = key.get("subscriptions").and_then(Value::as_array).unwrap();
        assert_eq!(subs.len(), 1, "activation key {ak}");
    }
    assert!(!dir.path().join("locks").join(format!("manifest-org-{org}.lock")).exists());
}
