//! Role filters from a resource-type → permissions map.

use super::{SetupError, SetupOrchestrator};
use crate::client::options;
use crate::factory::Overrides;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use sutforge_common::EntityHandle;
use tracing::info;

/// Permissions wanted for one resource type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionRequest {
    pub permissions: Vec<String>,
    #[serde(default)]
    pub search: Option<String>,
}

impl PermissionRequest {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            search: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

impl SetupOrchestrator {
    /// Permission name → id, grouped by resource type.
    pub async fn available_permissions(&self) -> Result<HashMap<String, BTreeMap<String, u64>>, SetupError> {
        let all = self
            .client
            .search("Permission", options([("per-page", 10000)]))
            .await?;
        let mut grouped: HashMap<String, BTreeMap<String, u64>> = HashMap::new();
        for permission in all {
            let (Some(name), Some(id)) = (permission.name(), permission.id()) else {
                continue;
            };
            // The API calls it `resource_type`, hammer's column is `Resource`.
            let resource = permission
                .get_str("resource-type")
                .or_else(|| permission.get_str("resource"))
                .unwrap_or_default();
            grouped
                .entry(resource.to_string())
                .or_default()
                .insert(name.to_string(), id);
        }
        Ok(grouped)
    }

    /// Create one filter per resource type on `role_id`. Every requested
    /// permission must exist for its resource type; nothing is created
    /// otherwise.
    pub async fn create_role_permissions(
        &self,
        role_id: u64,
        requests: &BTreeMap<String, PermissionRequest>,
    ) -> Result<Vec<EntityHandle>, SetupError> {
        let available = self.available_permissions().await?;

        let mut plan = Vec::with_capacity(requests.len());
        for (resource, request) in requests {
            let known = available.get(resource);
            let missing: Vec<String> = request
                .permissions
                .iter()
                .filter(|p| known.is_none_or(|k| !k.contains_key(p.as_str())))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(SetupError::PermissionMissing {
                    resource: resource.clone(),
                    missing,
                });
            }
            let ids: Vec<u64> = match known {
                Some(known) => request.permissions.iter().filter_map(|p| known.get(p).copied()).collect(),
                None => Vec::new(),
            };
            plan.push((resource, ids, request.search.clone()));
        }

        let mut filters = Vec::with_capacity(plan.len());
        for (resource, ids, search) in plan {
            let mut overrides = Overrides::new()
                .set("role-id", role_id)
                .set("permission-ids", ids);
            if let Some(search) = search {
                overrides = overrides.set("search", search);
            }
            let filter = self.factory.make_filter(overrides).await?;
            info!(role_id, resource = %resource, "Filter created");
            filters.push(filter);
        }
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntityClient;
    use crate::tasks::RetryPolicy;
    use crate::transport::mock::MockSut;
    use crate::transport::{Action, Transport};
    use serde_json::json;
    use std::sync::Arc;
    use sutforge_common::Settings;

    fn orchestrator(sut: &Arc<MockSut>) -> SetupOrchestrator {
        let transport: Arc<dyn Transport> = sut.clone();
        let settings = Arc::new(Settings::from_yaml_str("server:\n  hostname: sut.example.test\n").unwrap());
        SetupOrchestrator::new(transport.clone(), settings)
            .unwrap()
            .with_client(EntityClient::new(transport).with_read_retry(RetryPolicy::none()))
    }

    #[tokio::test]
    async fn test_one_filter_per_resource_type() {
        let sut = Arc::new(MockSut::new());
        let role = sut.seed("Role", json!({"name": "viewer"}));
        let requests = BTreeMap::from([
            (
                "Domain".to_string(),
                PermissionRequest::new(["view_domains", "edit_domains"]).with_search("name ~ lab"),
            ),
            ("Host".to_string(), PermissionRequest::new(["view_hosts"])),
        ]);
        let filters = orchestrator(&sut)
            .create_role_permissions(role, &requests)
            .await
            .unwrap();

        assert_eq!(filters.len(), 2);
        let domain_filter = &filters[0];
        assert_eq!(domain_filter.get_u64("role-id"), Some(role));
        assert_eq!(domain_filter.get_str("search"), Some("name ~ lab"));
        assert_eq!(
            domain_filter.get("permission-ids").and_then(|v| v.as_array()).map(Vec::len),
            Some(2)
        );
        assert!(filters[1].get("search").is_none());
    }

    #[tokio::test]
    async fn test_permissions_grouped_from_hammer_columns() {
        use crate::transport::cli::CliTransport;
        use crate::transport::mock::MockExecutor;
        use sutforge_common::Credentials;

        let executor = Arc::new(MockExecutor::new("sut.test"));
        executor.push_output(
            0,
            r#"[
                {"ID": 11, "Name": "view_domains", "Resource": "Domain"},
                {"ID": 12, "Name": "edit_domains", "Resource": "Domain"},
                {"ID": 30, "Name": "view_hosts", "Resource": "Host"}
            ]"#,
            "",
        );
        let transport: Arc<dyn Transport> =
            Arc::new(CliTransport::with_credentials(executor.clone(), Credentials::new("admin", "x")));
        let settings = Arc::new(Settings::from_yaml_str("server:\n  hostname: sut.test\n").unwrap());
        let orchestrator = SetupOrchestrator::new(transport.clone(), settings)
            .unwrap()
            .with_client(EntityClient::new(transport).with_read_retry(RetryPolicy::none()));

        let grouped = orchestrator.available_permissions().await.unwrap();
        assert_eq!(grouped["Domain"].get("edit_domains"), Some(&12));
        assert_eq!(grouped["Host"].len(), 1);
        assert!(executor.commands()[0].contains("filter available-permissions"));
    }

    #[tokio::test]
    async fn test_missing_permissions_are_listed_and_nothing_is_created() {
        let sut = Arc::new(MockSut::new());
        let requests = BTreeMap::from([(
            "Domain".to_string(),
            PermissionRequest::new(["view_domains", "fly_domains", "sing_domains"]),
        )]);
        let err = orchestrator(&sut)
            .create_role_permissions(1, &requests)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Permissions not available for Domain: fly_domains, sing_domains");
        assert_eq!(err.code(), sutforge_common::ErrorCode::SetupPermissionMissing);
        assert!(sut.requests_for("Filter", &Action::Create).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let sut = Arc::new(MockSut::new());
        let requests = BTreeMap::from([(
            "Spaceship".to_string(),
            PermissionRequest::new(["view_spaceships"]),
        )]);
        let err = orchestrator(&sut)
            .create_role_permissions(1, &requests)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::PermissionMissing { ref resource, .. } if resource == "Spaceship"));
    }
}
