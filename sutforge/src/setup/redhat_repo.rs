//! Organisation with a synced Red Hat repository behind an activation key.

use super::custom_repo::CustomRepoOptions;
use super::{DEFAULT_SUBSCRIPTION_NAME, SetupBundle, SetupError, SetupOrchestrator, require_id};
use crate::client::options;
use serde_json::Value;
use sutforge_common::EntityHandle;
use tracing::info;

/// A repository set and the repository enabling it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedHatRepo {
    pub product: &'static str,
    pub repository_set: &'static str,
    pub repository: &'static str,
    pub basearch: &'static str,
    pub releasever: Option<&'static str>,
    /// Key under `repos` holding a downstream mirror URL.
    pub mirror_key: Option<&'static str>,
}

pub const RHEL7_SERVER: RedHatRepo = RedHatRepo {
    product: "Red Hat Enterprise Linux Server",
    repository_set: "Red Hat Enterprise Linux 7 Server (RPMs)",
    repository: "Red Hat Enterprise Linux 7 Server RPMs x86_64 7Server",
    basearch: "x86_64",
    releasever: Some("7Server"),
    mirror_key: Some("rhel7_os"),
};

#[derive(Debug, Clone)]
pub struct RedHatRepoOptions {
    pub repo: RedHatRepo,
    pub organization_id: Option<u64>,
    pub lifecycle_environment_id: Option<u64>,
    pub content_view_id: Option<u64>,
    pub activationkey_id: Option<u64>,
    /// Upload a manifest even when the mirror fallback is taken.
    pub force_manifest_upload: bool,
}

impl RedHatRepoOptions {
    pub fn new(repo: RedHatRepo) -> Self {
        Self {
            repo,
            organization_id: None,
            lifecycle_environment_id: None,
            content_view_id: None,
            activationkey_id: None,
            force_manifest_upload: false,
        }
    }
}

impl SetupOrchestrator {
    /// Downstream mirror URL to use instead of the CDN, if any.
    pub fn mirror_url(&self, repo: &RedHatRepo) -> Result<Option<String>, SetupError> {
        if self.settings.get_bool_or("robottelo.cdn", true)? {
            return Ok(None);
        }
        match repo.mirror_key {
            Some(key) => Ok(self.settings.get_opt_string(&format!("repos.{key}"))?),
            None => Ok(None),
        }
    }

    pub async fn setup_org_for_a_rh_repo(&self, opts: &RedHatRepoOptions) -> Result<SetupBundle, SetupError> {
        if let Some(url) = self.mirror_url(&opts.repo)? {
            info!(url = %url, repository = opts.repo.repository, "Using downstream mirror instead of CDN");
            let org_id = self.ensure_org(opts.organization_id).await?;
            if opts.force_manifest_upload {
                self.upload_cloned_manifest(org_id).await?;
            }
            return self
                .setup_org_for_a_custom_repo(&CustomRepoOptions {
                    url,
                    organization_id: Some(org_id),
                    lifecycle_environment_id: opts.lifecycle_environment_id,
                    content_view_id: opts.content_view_id,
                    activationkey_id: opts.activationkey_id,
                    subscription: None,
                })
                .await;
        }

        let org_id = self.ensure_org(opts.organization_id).await?;
        let env_id = self.ensure_lifecycle_environment(org_id, opts.lifecycle_environment_id).await?;
        self.upload_cloned_manifest(org_id).await?;

        let repo = self.enable_rh_repo(org_id, &opts.repo).await?;
        let repo_id = require_id("repository", &repo)?;
        let product_id = repo
            .get_u64("product-id")
            .ok_or_else(|| SetupError::EntityMissing {
                what: "product of repository".into(),
                query: format!("id = {repo_id}"),
            })?;
        self.sync_repository(repo_id).await?;

        let content_view_id = self
            .publish_and_promote(org_id, env_id, repo_id, opts.content_view_id)
            .await?;
        let activationkey_id = self
            .bind_activation_key(org_id, env_id, content_view_id, opts.activationkey_id)
            .await?;
        self.attach_subscription(activationkey_id, org_id, DEFAULT_SUBSCRIPTION_NAME)
            .await?;

        let bundle = SetupBundle {
            activationkey_id,
            content_view_id,
            lifecycle_environment_id: env_id,
            organization_id: org_id,
            product_id,
            repository_id: repo_id,
        };
        info!(?bundle, "Red Hat repository setup finished");
        Ok(bundle)
    }

    /// Enable a repository set in an organisation and return the
    /// repository it produced.
    pub async fn enable_rh_repo(&self, org_id: u64, repo: &RedHatRepo) -> Result<EntityHandle, SetupError> {
        let set = self
            .find_one(
                "RepositorySet",
                "repository set",
                &format!("name = \"{}\"", repo.repository_set),
                options([("organization-id", org_id)]),
            )
            .await?;
        let set_id = require_id("repository set", &set)?;

        let mut enable = options([
            ("id", Value::from(set_id)),
            ("organization-id", Value::from(org_id)),
            ("basearch", Value::from(repo.basearch)),
        ]);
        if let Some(releasever) = repo.releasever {
            enable.insert("releasever".into(), Value::from(releasever));
        }
        self.client.action("RepositorySet", "enable", enable).await?;

        self.find_one(
            "Repository",
            "repository",
            &format!("name = \"{}\"", repo.repository),
            options([("organization-id", org_id)]),
        )
        .await
    }
}
