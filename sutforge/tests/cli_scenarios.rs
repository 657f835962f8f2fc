//! Setup scenarios over hammer, with the SUT's output scripted.

mod common;

use std::sync::Arc;
use sutforge::setup::{CustomRepoOptions, SetupError};
use sutforge::transport::mock::MockExecutor;
use tempfile::TempDir;

/// What hammer prints, in the order the custom repository setup asks.
const CUSTOM_REPO_SESSION: &[&str] = &[
    r#"{"Message": "Organization created.", "Id": 1, "Name": "zooOrg"}"#,
    r#"{"Id": 1, "Title": "zooOrg", "Name": "zooOrg", "Label": "zooOrg", "Description": null}"#,
    r#"{"Message": "Environment created.", "Id": 2, "Name": "Dev"}"#,
    r#"{"ID": 2, "Name": "Dev", "Label": "Dev", "Organization": "zooOrg", "Prior Lifecycle Environment": "Library"}"#,
    r#"{"Message": "Product created.", "Id": 3, "Name": "zoo"}"#,
    r#"{"ID": 3, "Name": "zoo", "Label": "zoo", "Organization": "zooOrg", "Sync State": "Not synced"}"#,
    r#"{"Message": "Repository created.", "Id": 4, "Name": "zoo-yum"}"#,
    r#"{"ID": 4, "Name": "zoo-yum", "Label": "zoo-yum", "Content Type": "yum", "Url": "http://mirror.example.test/zoo/", "Product": {"ID": 3, "Name": "zoo"}}"#,
    "[............................................] [100%]\nRepository \"zoo-yum\" synchronized.",
    r#"{"Message": "Content view created.", "Id": 5, "Name": "zoo-cv"}"#,
    r#"{"ID": 5, "Name": "zoo-cv", "Label": "zoo-cv", "Composite": false, "Organization": "zooOrg"}"#,
    "The repository has been associated.",
    "[............................................] [100%]",
    r#"[{"ID": 6, "Name": "zoo-cv 1.0", "Version": "1.0", "Description": null, "Lifecycle Environments": "Library"}]"#,
    "[............................................] [100%]",
    r#"{"Message": "Activation key created.", "Id": 7, "Name": "zoo-ak"}"#,
    r#"{"ID": 7, "Name": "zoo-ak", "Host Limit": "Unlimited", "Lifecycle Environment": "Dev", "Content View": "zoo-cv"}"#,
    r#"[{"ID": 8, "UUID": "4f2b0c9e", "Name": "zoo", "Type": "Physical", "End Date": "2049-01-01", "Quantity": "Unlimited", "Consumed": 0}]"#,
    "Subscription added to activation key.",
];

/// `<subcommand> <action>` each call ran, in order.
const CUSTOM_REPO_CALLS: &[&str] = &[
    "organization create",
    "organization info",
    "lifecycle-environment create",
    "lifecycle-environment info",
    "product create",
    "product info",
    "repository create",
    "repository info",
    "repository synchronize",
    "content-view create",
    "content-view info",
    "content-view add-repository",
    "content-view publish",
    "content-view version list",
    "content-view version promote",
    "activation-key create",
    "activation-key info",
    "subscription list",
    "activation-key add-subscription",
];

fn scripted(outputs: &[&str]) -> Arc<MockExecutor> {
    let executor = Arc::new(MockExecutor::new(common::HOSTNAME));
    for stdout in outputs {
        executor.push_output(0, stdout, "");
    }
    executor
}

fn hammer_call(command: &str) -> &str {
    command
        .split_once("--output=json ")
        .map(|(_, tail)| tail)
        .unwrap_or(command)
}

#[tokio::test]
async fn custom_repo_setup_runs_over_hammer() {
    let dir = TempDir::new().unwrap();
    let executor = scripted(CUSTOM_REPO_SESSION);
    let setup = common::cli_orchestrator(&executor, dir.path());

    let bundle = setup
        .setup_org_for_a_custom_repo(&CustomRepoOptions::new("http://mirror.example.test/zoo/"))
        .await
        .unwrap();

    assert_eq!(bundle.organization_id, 1);
    assert_eq!(bundle.lifecycle_environment_id, 2);
    assert_eq!(bundle.product_id, 3);
    assert_eq!(bundle.repository_id, 4);
    assert_eq!(bundle.content_view_id, 5);
    assert_eq!(bundle.activationkey_id, 7);

    let commands = executor.commands();
    assert_eq!(commands.len(), CUSTOM_REPO_CALLS.len(), "{commands:#?}");
    for (command, call) in commands.iter().zip(CUSTOM_REPO_CALLS) {
        assert!(hammer_call(command).starts_with(call), "expected {call}, ran {command}");
    }
    // Hammer blocks on its own tasks, so nothing polls `task list`.
    assert!(commands.iter().all(|c| !hammer_call(c).starts_with("task ")));

    assert!(commands[6].contains(r#"--product-id="3""#));
    assert!(commands[6].contains(r#"--url="http://mirror.example.test/zoo/""#));
    assert!(commands[8].contains(r#"--id="4""#));
    assert!(commands[14].contains(r#"--id="6""#));
    assert!(commands[14].contains(r#"--to-lifecycle-environment-id="2""#));
    assert!(commands[17].contains(r#"--search="name = \"zoo\"""#), "{}", commands[17]);
    assert!(commands[18].contains(r#"--subscription-id="8""#));
    assert!(commands.iter().all(|c| c.contains("-u admin -p changeme")));
}

#[tokio::test]
async fn exhausted_subscription_stops_the_setup() {
    let dir = TempDir::new().unwrap();
    let mut session = CUSTOM_REPO_SESSION.to_vec();
    session[17] = r#"[{"ID": 8, "Name": "zoo", "Quantity": 0, "Consumed": 10}]"#;
    session.pop();
    let executor = scripted(&session);

    let err = common::cli_orchestrator(&executor, dir.path())
        .setup_org_for_a_custom_repo(&CustomRepoOptions::new("http://mirror.example.test/zoo/"))
        .await
        .unwrap_err();

    assert!(matches!(err, SetupError::SubscriptionExhausted { ref name, org_id: 1 } if name == "zoo"));
    assert!(executor.commands().iter().all(|c| !c.contains("add-subscription")));
}

#[tokio::test]
async fn failed_synchronize_surfaces_hammer_error() {
    let dir = TempDir::new().unwrap();
    let executor = scripted(&CUSTOM_REPO_SESSION[..8]);
    executor.push_output(
        70,
        "",
        "Error: Task 3c5b: RuntimeError: 404 Not Found for http://mirror.example.test/zoo/repodata/repomd.xml",
    );

    let err = common::cli_orchestrator(&executor, dir.path())
        .setup_org_for_a_custom_repo(&CustomRepoOptions::new("http://mirror.example.test/zoo/"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("404 Not Found"), "{err}");
    assert_eq!(executor.commands().len(), 9);
}
