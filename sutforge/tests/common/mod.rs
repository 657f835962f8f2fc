//! Shared fixtures for the sutforge integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sutforge::client::EntityClient;
use sutforge::factory::FactoryDispatcher;
use sutforge::setup::SetupOrchestrator;
use sutforge::tasks::RetryPolicy;
use sutforge::transport::mock::{MockExecutor, MockSut};
use sutforge::transport::{CliTransport, Transport};
use sutforge_common::testing::init_test_logging;
use sutforge_common::{Credentials, Settings, TargetKind};

pub const HOSTNAME: &str = "sut.example.test";

/// Settings for the mock SUT. A base manifest is written into `dir`.
pub fn settings(dir: &Path) -> Arc<Settings> {
    let manifest = dir.join("manifest-base.zip");
    std::fs::write(&manifest, b"PK\x03\x04mock-manifest").unwrap();
    let yaml = format!(
        "server:\n  hostname: {HOSTNAME}\n  admin_username: admin\n  admin_password: changeme\nfake_manifest:\n  path: {}\n",
        manifest.display()
    );
    Arc::new(Settings::from_yaml_str(&yaml).unwrap())
}

pub fn sut() -> Arc<MockSut> {
    init_test_logging();
    Arc::new(MockSut::new())
}

pub fn transport(sut: &Arc<MockSut>) -> Arc<dyn Transport> {
    sut.clone()
}

pub fn client(sut: &Arc<MockSut>) -> EntityClient {
    EntityClient::new(transport(sut)).with_read_retry(RetryPolicy::none())
}

pub fn dispatcher(transport: &Arc<dyn Transport>, settings: Arc<Settings>) -> FactoryDispatcher {
    FactoryDispatcher::new(transport, settings, TargetKind::Server)
}

/// An orchestrator with fast polling and its lock files under `dir`.
pub fn orchestrator(sut: &Arc<MockSut>, dir: &Path) -> SetupOrchestrator {
    SetupOrchestrator::new(transport(sut), settings(dir))
        .unwrap()
        .with_client(client(sut))
        .with_poll_interval(Duration::from_millis(1))
        .with_lock_dir(dir.join("locks"))
}

/// Hammer over a scripted executor, as `admin`.
pub fn cli_transport(executor: &Arc<MockExecutor>) -> Arc<dyn Transport> {
    init_test_logging();
    Arc::new(CliTransport::with_credentials(
        executor.clone(),
        Credentials::new("admin", "changeme"),
    ))
}

/// Same as [`orchestrator`], with hammer as the transport.
pub fn cli_orchestrator(executor: &Arc<MockExecutor>, dir: &Path) -> SetupOrchestrator {
    let transport = cli_transport(executor);
    SetupOrchestrator::new(transport.clone(), settings(dir))
        .unwrap()
        .with_client(EntityClient::new(transport).with_read_retry(RetryPolicy::none()))
        .with_poll_interval(Duration::from_millis(1))
        .with_lock_dir(dir.join("locks"))
}
