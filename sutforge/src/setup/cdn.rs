//! Mixed CDN and custom repositories in one organisation.

use super::redhat_repo::RedHatRepo;
use super::{SetupError, SetupOrchestrator, require_id};
use crate::client::options;
use crate::factory::Overrides;
use serde_json::Value;
use sutforge_common::EntityHandle;
use tracing::info;

#[derive(Debug, Clone)]
pub enum RepoDescriptor {
    /// A repository set enabled from the manifest.
    Cdn(RedHatRepo),
    /// A repository created in the shared custom product.
    Custom { url: String, content_type: String },
}

impl RepoDescriptor {
    pub fn yum(url: impl Into<String>) -> Self {
        Self::Custom {
            url: url.into(),
            content_type: "yum".into(),
        }
    }

    pub fn is_cdn(&self) -> bool {
        matches!(self, Self::Cdn(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CdnRepos {
    pub repos: Vec<EntityHandle>,
    pub custom_product: Option<EntityHandle>,
}

impl SetupOrchestrator {
    /// Enable or create every described repository. A manifest is uploaded
    /// first when any descriptor is a CDN one. With `download_policy` set,
    /// every repository is switched to it; with `sync`, all are
    /// synchronised.
    pub async fn setup_cdn_and_custom_repositories(
        &self,
        org_id: u64,
        descriptors: &[RepoDescriptor],
        download_policy: Option<&str>,
        sync: bool,
    ) -> Result<CdnRepos, SetupError> {
        if descriptors.iter().any(RepoDescriptor::is_cdn) {
            self.upload_cloned_manifest(org_id).await?;
        }

        let mut result = CdnRepos::default();
        for descriptor in descriptors {
            let repo = match descriptor {
                RepoDescriptor::Cdn(rh) => self.enable_rh_repo(org_id, rh).await?,
                RepoDescriptor::Custom { url, content_type } => {
                    let product_id = match &result.custom_product {
                        Some(product) => require_id("product", product)?,
                        None => {
                            let product = self
                                .factory
                                .make_product(Overrides::new().set("organization-id", org_id))
                                .await?;
                            let id = require_id("product", &product)?;
                            result.custom_product = Some(product);
                            id
                        }
                    };
                    self.factory
                        .make_repository(
                            Overrides::new()
                                .set("product-id", product_id)
                                .set("url", url.as_str())
                                .set("content-type", content_type.as_str()),
                        )
                        .await?
                }
            };
            result.repos.push(repo);
        }

        if let Some(policy) = download_policy {
            let mut updated = Vec::with_capacity(result.repos.len());
            for repo in &result.repos {
                let id = require_id("repository", repo)?;
                self.client
                    .update("Repository", id, options([("download-policy", Value::from(policy))]))
                    .await?;
                updated.push(self.client.read("Repository", id).await?);
            }
            result.repos = updated;
        }

        if sync {
            for repo in &result.repos {
                self.sync_repository(require_id("repository", repo)?).await?;
            }
        }

        info!(
            org_id,
            repos = result.repos.len(),
            custom = result.custom_product.is_some(),
            "CDN and custom repositories ready"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntityClient;
    use crate::setup::RHEL7_SERVER;
    use crate::tasks::RetryPolicy;
    use crate::transport::mock::MockSut;
    use crate::transport::{Action, Transport};
    use std::sync::Arc;
    use std::time::Duration;
    use sutforge_common::Settings;
    use tempfile::TempDir;

    fn orchestrator(sut: &Arc<MockSut>, dir: &TempDir) -> SetupOrchestrator {
        let manifest = dir.path().join("base.zip");
        std::fs::write(&manifest, b"PK\x03\x04").unwrap();
        let yaml = format!(
            "server:\n  hostname: sut.example.test\nfake_manifest:\n  path: {}\n",
            manifest.display()
        );
        let transport: Arc<dyn Transport> = sut.clone();
        SetupOrchestrator::new(transport.clone(), Arc::new(Settings::from_yaml_str(&yaml).unwrap()))
            .unwrap()
            .with_client(EntityClient::new(transport).with_read_retry(RetryPolicy::none()))
            .with_poll_interval(Duration::from_millis(1))
            .with_lock_dir(dir.path().join("locks"))
    }

    #[tokio::test]
    async fn test_mixed_repositories_share_one_custom_product() {
        let dir = TempDir::new().unwrap();
        let sut = Arc::new(MockSut::new());
        let org = sut.seed("Org", serde_json::json!({"name": "mixed"}));
        let repos = orchestrator(&sut, &dir)
            .setup_cdn_and_custom_repositories(
                org,
                &[
                    RepoDescriptor::Cdn(RHEL7_SERVER),
                    RepoDescriptor::yum("http://mirror.example.test/a/"),
                    RepoDescriptor::yum("http://mirror.example.test/b/"),
                ],
                Some("on_demand"),
                true,
            )
            .await
            .unwrap();

        assert_eq!(repos.repos.len(), 3);
        assert!(repos.repos.iter().all(|r| r.get_str("download-policy") == Some("on_demand")));
        let product = repos.custom_product.unwrap().id();
        assert_eq!(repos.repos[1].get_u64("product-id"), product);
        assert_eq!(repos.repos[2].get_u64("product-id"), product);
        assert_eq!(sut.upload_count(org), 1);
        assert_eq!(sut.requests_for("Repository", &Action::Custom("sync".into())).len(), 3);
    }

    #[tokio::test]
    async fn test_custom_only_skips_manifest() {
        let dir = TempDir::new().unwrap();
        let sut = Arc::new(MockSut::new());
        let org = sut.seed("Org", serde_json::json!({"name": "plain"}));
        let repos = orchestrator(&sut, &dir)
            .setup_cdn_and_custom_repositories(
                org,
                &[RepoDescriptor::yum("http://mirror.example.test/a/")],
                None,
                false,
            )
            .await
            .unwrap();
        assert_eq!(repos.repos.len(), 1);
        assert_eq!(sut.upload_count(org), 0);
        assert!(sut.requests_for("Repository", &Action::Custom("sync".into())).is_empty());
    }
}
