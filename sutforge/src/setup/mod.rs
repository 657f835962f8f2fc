//! Composed setup scenarios.
//!
//! Each scenario is a single entry point on [`SetupOrchestrator`] that
//! builds a set of related SUT entities and returns their ids. Content
//! operations (sync, publish, promote) always wait for the SUT task to
//! finish successfully before the next step starts.

pub mod cdn;
pub mod content;
pub mod custom_repo;
pub mod manifest;
pub mod permissions;
pub mod provisioning;
pub mod redhat_repo;

use crate::client::EntityClient;
use crate::factory::{FactoryDispatcher, FactoryError};
use crate::tasks::{TaskError, TaskPoller};
use crate::transport::{Transport, TransportError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sutforge_common::{ConfigError, ErrorCode, Settings, TargetKind};
use thiserror::Error;

pub use cdn::{CdnRepos, RepoDescriptor};
pub use custom_repo::CustomRepoOptions;
pub use manifest::{ManifestLock, clone_manifest};
pub use permissions::PermissionRequest;
pub use provisioning::{ProvisioningBundle, ProvisioningOptions};
pub use redhat_repo::{RHEL7_SERVER, RedHatRepo, RedHatRepoOptions};

/// Subscription a manifest provides.
pub const DEFAULT_SUBSCRIPTION_NAME: &str =
    "Red Hat Enterprise Linux Server, Standard (Physical or Virtual Nodes)";

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Subscription '{name}' not found in organization {org_id}")]
    SubscriptionNotFound { name: String, org_id: u64 },

    #[error("Subscription '{name}' in organization {org_id} has no quantity left")]
    SubscriptionExhausted { name: String, org_id: u64 },

    #[error("Permissions not available for {resource}: {}", .missing.join(", "))]
    PermissionMissing {
        resource: String,
        missing: Vec<String>,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Timed out after {} waiting for manifest lock {}", humantime::format_duration(*.timeout), .path.display())]
    ManifestLockTimeout { path: PathBuf, timeout: Duration },

    #[error("No {what} found using query {query}")]
    EntityMissing { what: String, query: String },

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SetupError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SubscriptionNotFound { .. } | Self::SubscriptionExhausted { .. } => {
                ErrorCode::SetupSubscriptionNotFound
            }
            Self::PermissionMissing { .. } => ErrorCode::SetupPermissionMissing,
            Self::Manifest(_) => ErrorCode::SetupManifestError,
            Self::ManifestLockTimeout { .. } => ErrorCode::ManifestLockTimeout,
            Self::EntityMissing { .. } => ErrorCode::SetupEntityMissing,
            Self::Factory(err) => err.code(),
            Self::Task(err) => err.code(),
            Self::Transport(err) => err.code(),
            Self::Config(err) => err.code(),
        }
    }
}

/// Ids of the entities a content scenario produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SetupBundle {
    pub activationkey_id: u64,
    pub content_view_id: u64,
    pub lifecycle_environment_id: u64,
    pub organization_id: u64,
    pub product_id: u64,
    pub repository_id: u64,
}

/// Deadlines for content waits.
#[derive(Debug, Clone)]
pub struct ContentTimeouts {
    pub sync: Duration,
    pub publish: Duration,
    pub promote: Duration,
    pub manifest_lock: Duration,
}

impl Default for ContentTimeouts {
    fn default() -> Self {
        Self {
            sync: Duration::from_secs(1800),
            publish: Duration::from_secs(600),
            promote: Duration::from_secs(600),
            manifest_lock: Duration::from_secs(1800),
        }
    }
}

/// Runs setup scenarios against one transport.
#[derive(Clone)]
pub struct SetupOrchestrator {
    client: EntityClient,
    factory: FactoryDispatcher,
    poller: TaskPoller,
    settings: Arc<Settings>,
    timeouts: ContentTimeouts,
    lock_dir: PathBuf,
}

impl SetupOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<Settings>) -> Result<Self, ConfigError> {
        let client = EntityClient::new(transport.clone());
        let factory = FactoryDispatcher::new(&transport, settings.clone(), TargetKind::Server);
        let lock_dir = settings.tmp_dir()?;
        Ok(Self {
            poller: TaskPoller::new(client.clone()),
            client,
            factory,
            settings,
            timeouts: ContentTimeouts::default(),
            lock_dir,
        })
    }

    /// Poll cadence for every task wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller = self.poller.with_interval(interval);
        self
    }

    pub fn with_timeouts(mut self, timeouts: ContentTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Directory holding the cross-worker manifest lock files.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Replace the entity client (read retries, user scope).
    pub fn with_client(mut self, client: EntityClient) -> Self {
        self.poller = TaskPoller::new(client.clone()).with_interval(self.poller.interval());
        self.client = client;
        self
    }

    pub fn client(&self) -> &EntityClient {
        &self.client
    }

    pub fn factory(&self) -> &FactoryDispatcher {
        &self.factory
    }

    pub fn poller(&self) -> &TaskPoller {
        &self.poller
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Id of a freshly created or read entity.
pub(crate) fn require_id(what: &str, handle: &sutforge_common::EntityHandle) -> Result<u64, SetupError> {
    handle.id().ok_or_else(|| SetupError::EntityMissing {
        what: what.to_string(),
        query: format!("id in {}", serde_json::Value::Object(handle.as_map().clone())),
    })
}
