//! Organisation with a synced custom repository behind an activation key.

use super::{SetupBundle, SetupError, SetupOrchestrator, require_id};
use crate::client::options;
use crate::factory::Overrides;
use tracing::info;

/// Inputs for [`SetupOrchestrator::setup_org_for_a_custom_repo`]. Every id
/// left unset is created.
#[derive(Debug, Clone, Default)]
pub struct CustomRepoOptions {
    pub url: String,
    pub organization_id: Option<u64>,
    pub lifecycle_environment_id: Option<u64>,
    pub content_view_id: Option<u64>,
    pub activationkey_id: Option<u64>,
    /// Subscription to attach. Defaults to the product's own.
    pub subscription: Option<String>,
}

impl CustomRepoOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl SetupOrchestrator {
    pub async fn setup_org_for_a_custom_repo(
        &self,
        opts: &CustomRepoOptions,
    ) -> Result<SetupBundle, SetupError> {
        let org_id = self.ensure_org(opts.organization_id).await?;
        let env_id = self.ensure_lifecycle_environment(org_id, opts.lifecycle_environment_id).await?;

        let product = self
            .factory
            .make_product(Overrides::new().set("organization-id", org_id))
            .await?;
        let product_id = require_id("product", &product)?;
        let repo = self
            .factory
            .make_repository(
                Overrides::new()
                    .set("product-id", product_id)
                    .set("url", opts.url.as_str()),
            )
            .await?;
        let repo_id = require_id("repository", &repo)?;
        self.sync_repository(repo_id).await?;

        let content_view_id = self
            .publish_and_promote(org_id, env_id, repo_id, opts.content_view_id)
            .await?;
        let activationkey_id = self
            .bind_activation_key(org_id, env_id, content_view_id, opts.activationkey_id)
            .await?;

        let subscription = match &opts.subscription {
            Some(name) => name.clone(),
            None => product
                .name()
                .map(str::to_string)
                .ok_or_else(|| SetupError::EntityMissing {
                    what: "product name".into(),
                    query: format!("id = {product_id}"),
                })?,
        };
        self.attach_subscription(activationkey_id, org_id, &subscription)
            .await?;

        let bundle = SetupBundle {
            activationkey_id,
            content_view_id,
            lifecycle_environment_id: env_id,
            organization_id: org_id,
            product_id,
            repository_id: repo_id,
        };
        info!(?bundle, "Custom repository setup finished");
        Ok(bundle)
    }

    pub(crate) async fn ensure_org(&self, organization_id: Option<u64>) -> Result<u64, SetupError> {
        match organization_id {
            Some(id) => Ok(id),
            None => {
                let org = self.factory.make_org(Overrides::new()).await?;
                require_id("organization", &org)
            }
        }
    }

    pub(crate) async fn ensure_lifecycle_environment(
        &self,
        org_id: u64,
        environment_id: Option<u64>,
    ) -> Result<u64, SetupError> {
        match environment_id {
            Some(id) => Ok(id),
            None => {
                let env = self
                    .factory
                    .make_lifecycle_environment(Overrides::new().set("organization-id", org_id))
                    .await?;
                require_id("lifecycle environment", &env)
            }
        }
    }

    /// Attach `repo_id` to a content view (created when `None`), publish
    /// it and promote the new version to `env_id`.
    pub(crate) async fn publish_and_promote(
        &self,
        org_id: u64,
        env_id: u64,
        repo_id: u64,
        content_view_id: Option<u64>,
    ) -> Result<u64, SetupError> {
        let content_view_id = match content_view_id {
            Some(id) => id,
            None => {
                let cv = self
                    .factory
                    .make_content_view(Overrides::new().set("organization-id", org_id))
                    .await?;
                require_id("content view", &cv)?
            }
        };
        self.add_repository(content_view_id, repo_id).await?;
        let version = self.publish_content_view(content_view_id).await?;
        let version_id = require_id("content view version", &version)?;
        self.promote_version(version_id, env_id).await?;
        Ok(content_view_id)
    }

    /// Create an activation key on the view and environment, or re-bind an
    /// existing one.
    pub(crate) async fn bind_activation_key(
        &self,
        org_id: u64,
        env_id: u64,
        content_view_id: u64,
        activationkey_id: Option<u64>,
    ) -> Result<u64, SetupError> {
        match activationkey_id {
            Some(id) => {
                self.client
                    .update(
                        "ActivationKey",
                        id,
                        options([
                            ("organization-id", org_id),
                            ("content-view-id", content_view_id),
                            ("lifecycle-environment-id", env_id),
                        ]),
                    )
                    .await?;
                Ok(id)
            }
            None => {
                let ak = self
                    .factory
                    .make_activation_key(
                        Overrides::new()
                            .set("organization-id", org_id)
                            .set("lifecycle-environment-id", env_id)
                            .set("content-view-id", content_view_id),
                    )
                    .await?;
                require_id("activation key", &ak)
            }
        }
    }
}
