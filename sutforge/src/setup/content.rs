//! Content steps shared by every scenario.

use super::{SetupError, SetupOrchestrator, require_id};
use crate::client::options;
use crate::tasks::TaskSearch;
use crate::tasks::poll::{PROMOTE_TASK_LABEL, PUBLISH_TASK_LABEL, SYNC_TASK_LABEL};
use crate::transport::Options;
use serde_json::Value;
use sutforge_common::{EntityHandle, TaskHandle};
use tracing::info;

impl SetupOrchestrator {
    /// Synchronise a repository and wait for its task.
    pub async fn sync_repository(&self, repo_id: u64) -> Result<Vec<TaskHandle>, SetupError> {
        let output = self
            .client
            .action("Repository", "sync", options([("id", repo_id)]))
            .await?;
        let search = TaskSearch::label(SYNC_TASK_LABEL).input("repository.id", repo_id);
        let tasks = self
            .poller
            .wait_for_action(&output, &search, self.timeouts.sync)
            .await?;
        info!(repo_id, "Repository synchronised");
        Ok(tasks)
    }

    pub async fn add_repository(&self, content_view_id: u64, repo_id: u64) -> Result<(), SetupError> {
        self.client
            .action(
                "ContentView",
                "add-repository",
                options([("id", content_view_id), ("repository-id", repo_id)]),
            )
            .await?;
        Ok(())
    }

    /// Publish a content view and return its newest version.
    pub async fn publish_content_view(&self, content_view_id: u64) -> Result<EntityHandle, SetupError> {
        let output = self
            .client
            .action("ContentView", "publish", options([("id", content_view_id)]))
            .await?;
        let search = TaskSearch::label(PUBLISH_TASK_LABEL).input("content_view.id", content_view_id);
        self.poller
            .wait_for_action(&output, &search, self.timeouts.publish)
            .await?;

        let versions = self
            .client
            .search(
                "ContentViewVersion",
                options([("content-view-id", content_view_id)]),
            )
            .await?;
        let latest = versions
            .into_iter()
            .max_by_key(|v| v.id().unwrap_or_default())
            .ok_or_else(|| SetupError::EntityMissing {
                what: "content view version".into(),
                query: format!("content-view-id = {content_view_id}"),
            })?;
        info!(content_view_id, version = ?latest.get_str("version"), "Content view published");
        Ok(latest)
    }

    /// Promote a content view version to an environment and wait.
    pub async fn promote_version(&self, version_id: u64, environment_id: u64) -> Result<(), SetupError> {
        let output = self
            .client
            .action(
                "ContentViewVersion",
                "promote",
                options([("id", version_id), ("to-lifecycle-environment-id", environment_id)]),
            )
            .await?;
        let search = TaskSearch::label(PROMOTE_TASK_LABEL).input("environment_ids", environment_id);
        self.poller
            .wait_for_action(&output, &search, self.timeouts.promote)
            .await?;
        info!(version_id, environment_id, "Content view version promoted");
        Ok(())
    }

    /// Attach the named subscription of an organisation to an activation
    /// key. Returns the subscription id.
    pub async fn attach_subscription(
        &self,
        activationkey_id: u64,
        organization_id: u64,
        name: &str,
    ) -> Result<u64, SetupError> {
        let subscription = self
            .client
            .find(
                "Subscription",
                &format!("name = \"{name}\""),
                options([("organization-id", organization_id), ("per-page", 1000)]),
            )
            .await?
            .ok_or_else(|| SetupError::SubscriptionNotFound {
                name: name.to_string(),
                org_id: organization_id,
            })?;
        if subscription.get("quantity").and_then(Value::as_i64) == Some(0) {
            return Err(SetupError::SubscriptionExhausted {
                name: name.to_string(),
                org_id: organization_id,
            });
        }
        let subscription_id = require_id("subscription", &subscription)?;
        self.client
            .action(
                "ActivationKey",
                "add-subscription",
                options([
                    ("id", activationkey_id),
                    ("subscription-id", subscription_id),
                    ("quantity", 1),
                ]),
            )
            .await?;
        info!(activationkey_id, subscription = name, "Subscription attached");
        Ok(subscription_id)
    }

    /// The single record matching `search`, or an error naming it.
    pub(crate) async fn find_one(
        &self,
        class: &str,
        what: &str,
        search: &str,
        scope: Options,
    ) -> Result<EntityHandle, SetupError> {
        self.client
            .find(class, search, scope)
            .await?
            .ok_or_else(|| SetupError::EntityMissing {
                what: what.to_string(),
                query: search.to_string(),
            })
    }
}
