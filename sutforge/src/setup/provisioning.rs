//! Provisioning environment: everything a host group needs to build hosts.

use super::{SetupError, SetupOrchestrator, require_id};
use crate::client::options;
use crate::factory::Overrides;
use serde::Serialize;
use serde_json::Value;
use sutforge_common::EntityHandle;
use tracing::{debug, info};

pub const DEFAULT_PTABLE: &str = "Kickstart default";
pub const DEFAULT_PROVISIONING_TEMPLATE: &str = "Kickstart default";
pub const DEFAULT_PXE_TEMPLATE: &str = "Kickstart default PXELinux";
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

#[derive(Debug, Clone, Default)]
pub struct ProvisioningOptions {
    pub organization_id: Option<u64>,
    pub location_id: Option<u64>,
    pub lifecycle_environment_id: Option<u64>,
    /// Domain to use. Defaults to the domain part of the SUT hostname.
    pub domain: Option<String>,
    /// Reuse an operating system instead of creating one.
    pub operatingsystem_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningBundle {
    pub organization_id: u64,
    pub location_id: u64,
    pub lifecycle_environment_id: u64,
    pub content_view_id: u64,
    pub host_group: EntityHandle,
    pub subnet: EntityHandle,
    pub domain: EntityHandle,
    pub ptable: EntityHandle,
    pub os: EntityHandle,
    pub medium: EntityHandle,
}

/// `handle[key]` as an id list with `ids` added, without duplicates.
fn with_ids(handle: &EntityHandle, key: &str, ids: &[u64]) -> Value {
    let mut merged: Vec<u64> = handle
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    for id in ids {
        if !merged.contains(id) {
            merged.push(*id);
        }
    }
    Value::from(merged)
}

impl SetupOrchestrator {
    pub async fn configure_provisioning(
        &self,
        opts: &ProvisioningOptions,
    ) -> Result<ProvisioningBundle, SetupError> {
        let org_id = self.ensure_org(opts.organization_id).await?;
        let loc_id = match opts.location_id {
            Some(id) => id,
            None => {
                let loc = self
                    .factory
                    .make_location(Overrides::new().set("organization-ids", vec![org_id]))
                    .await?;
                require_id("location", &loc)?
            }
        };
        let env_id = self
            .ensure_lifecycle_environment(org_id, opts.lifecycle_environment_id)
            .await?;

        let cv = self
            .factory
            .make_content_view(Overrides::new().set("organization-id", org_id))
            .await?;
        let cv_id = require_id("content view", &cv)?;
        let version = self.publish_content_view(cv_id).await?;
        self.promote_version(require_id("content view version", &version)?, env_id)
            .await?;

        let scope = |handle: &EntityHandle| {
            options([
                ("organization-ids", with_ids(handle, "organization-ids", &[org_id])),
                ("location-ids", with_ids(handle, "location-ids", &[loc_id])),
            ])
        };

        let puppet_env = self
            .factory
            .make_puppet_environment(
                Overrides::new()
                    .set("organization-ids", vec![org_id])
                    .set("location-ids", vec![loc_id]),
            )
            .await?;

        let hostname = self.settings.get_string("server.hostname")?;
        let proxy = self
            .find_one(
                "SmartProxy",
                "smart proxy",
                &format!("name = \"{hostname}\""),
                options([("per-page", 1000)]),
            )
            .await?;
        let proxy_id = require_id("smart proxy", &proxy)?;
        self.client.update("SmartProxy", proxy_id, scope(&proxy)).await?;
        debug!(proxy_id, org_id, loc_id, "Smart proxy linked");

        let domain_name = match &opts.domain {
            Some(domain) => domain.clone(),
            None => hostname
                .split_once('.')
                .map(|(_, domain)| domain.to_string())
                .unwrap_or_else(|| hostname.clone()),
        };
        let domain = match self
            .client
            .find("Domain", &format!("name = \"{domain_name}\""), options([("per-page", 1000)]))
            .await?
        {
            Some(existing) => {
                let id = require_id("domain", &existing)?;
                let mut update = scope(&existing);
                update.insert("dns-id".into(), Value::from(proxy_id));
                self.client.update("Domain", id, update).await?;
                self.client.read("Domain", id).await?
            }
            None => {
                self.factory
                    .make_domain(
                        Overrides::new()
                            .set("name", domain_name.as_str())
                            .set("dns-id", proxy_id)
                            .set("organization-ids", vec![org_id])
                            .set("location-ids", vec![loc_id]),
                    )
                    .await?
            }
        };
        let domain_id = require_id("domain", &domain)?;

        let subnet = self
            .factory
            .make_subnet(
                Overrides::new()
                    .set("domain-ids", vec![domain_id])
                    .set("organization-ids", vec![org_id])
                    .set("location-ids", vec![loc_id])
                    .set("dns-id", proxy_id)
                    .set("tftp-id", proxy_id)
                    .set("dhcp-id", proxy_id)
                    .set("ipam", "DHCP"),
            )
            .await?;
        let subnet_id = require_id("subnet", &subnet)?;

        let ptable = self
            .find_one(
                "PartitionTable",
                "partition table",
                &format!("name = \"{DEFAULT_PTABLE}\""),
                options([("per-page", 1000)]),
            )
            .await?;
        let ptable_id = require_id("partition table", &ptable)?;
        self.client.update("PartitionTable", ptable_id, scope(&ptable)).await?;

        let arch = self
            .find_one(
                "Architecture",
                "architecture",
                &format!("name = \"{DEFAULT_ARCHITECTURE}\""),
                options([("per-page", 1000)]),
            )
            .await?;
        let arch_id = require_id("architecture", &arch)?;

        let os = match opts.operatingsystem_id {
            Some(id) => self.client.read("OperatingSystem", id).await?,
            None => {
                self.factory
                    .make_os(
                        Overrides::new()
                            .set("architecture-ids", vec![arch_id])
                            .set("partition-table-ids", vec![ptable_id]),
                    )
                    .await?
            }
        };
        let os_id = require_id("operating system", &os)?;

        let medium = self
            .factory
            .make_medium(
                Overrides::new()
                    .set("operatingsystem-ids", vec![os_id])
                    .set("organization-ids", vec![org_id])
                    .set("location-ids", vec![loc_id]),
            )
            .await?;
        let medium_id = require_id("medium", &medium)?;

        let mut template_ids = Vec::new();
        for name in [DEFAULT_PROVISIONING_TEMPLATE, DEFAULT_PXE_TEMPLATE] {
            let template = self
                .find_one(
                    "ProvisioningTemplate",
                    "provisioning template",
                    &format!("name = \"{name}\""),
                    options([("per-page", 1000)]),
                )
                .await?;
            let template_id = require_id("provisioning template", &template)?;
            let mut update = scope(&template);
            update.insert(
                "operatingsystem-ids".into(),
                with_ids(&template, "operatingsystem-ids", &[os_id]),
            );
            self.client
                .update("ProvisioningTemplate", template_id, update)
                .await?;
            template_ids.push(template_id);
        }
        let os = {
            let mut update = options([
                ("architecture-ids", with_ids(&os, "architecture-ids", &[arch_id])),
                ("partition-table-ids", with_ids(&os, "partition-table-ids", &[ptable_id])),
                ("medium-ids", with_ids(&os, "medium-ids", &[medium_id])),
            ]);
            update.insert(
                "provisioning-template-ids".into(),
                with_ids(&os, "provisioning-template-ids", &template_ids),
            );
            self.client.update("OperatingSystem", os_id, update).await?;
            self.client.read("OperatingSystem", os_id).await?
        };

        let host_group = self
            .factory
            .make_hostgroup(
                Overrides::new()
                    .set("organization-ids", vec![org_id])
                    .set("location-ids", vec![loc_id])
                    .set("domain-id", domain_id)
                    .set("subnet-id", subnet_id)
                    .set("architecture-id", arch_id)
                    .set("operatingsystem-id", os_id)
                    .set("medium-id", medium_id)
                    .set("partition-table-id", ptable_id)
                    .set("puppet-environment-id", require_id("puppet environment", &puppet_env)?)
                    .set("lifecycle-environment-id", env_id)
                    .set("content-view-id", cv_id)
                    .set("content-source-id", proxy_id),
            )
            .await?;
        info!(
            host_group = ?host_group.name(),
            domain = %domain_name,
            os_id,
            "Provisioning environment configured"
        );

        Ok(ProvisioningBundle {
            organization_id: org_id,
            location_id: loc_id,
            lifecycle_environment_id: env_id,
            content_view_id: cv_id,
            host_group,
            subnet,
            domain,
            ptable: self.client.read("PartitionTable", ptable_id).await?,
            os,
            medium,
        })
    }
}
