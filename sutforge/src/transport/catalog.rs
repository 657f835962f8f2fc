//! Entity class catalog shared by both transports.

/// One addressable entity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityClass {
    /// Class name used by factories (`Org`, `ContentView`).
    pub name: &'static str,
    /// Hammer sub-command, if the CLI exposes the class.
    pub hammer: Option<&'static str>,
    /// REST collection path, if the API exposes the class.
    pub api_path: Option<&'static str>,
    /// Hammer action used for `list`. Some classes only list through a
    /// differently named sub-command.
    pub cli_list: &'static str,
}

const fn class(
    name: &'static str,
    hammer: &'static str,
    api_path: &'static str,
) -> EntityClass {
    EntityClass {
        name,
        hammer: Some(hammer),
        api_path: Some(api_path),
        cli_list: "list",
    }
}

pub const CLASSES: &[EntityClass] = &[
    class("ActivationKey", "activation-key", "/katello/api/activation_keys"),
    class("Architecture", "architecture", "/api/architectures"),
    class("ComputeResource", "compute-resource", "/api/compute_resources"),
    class("ContentCredential", "content-credentials", "/katello/api/content_credentials"),
    class("ContentView", "content-view", "/katello/api/content_views"),
    class("ContentViewVersion", "content-view version", "/katello/api/content_view_versions"),
    class("Domain", "domain", "/api/domains"),
    class("Environment", "puppet-environment", "/api/environments"),
    class("Filter", "filter", "/api/filters"),
    class("ForemanTask", "task", "/foreman_tasks/api/tasks"),
    class("Host", "host", "/api/hosts"),
    class("HostCollection", "host-collection", "/katello/api/host_collections"),
    class("HostGroup", "hostgroup", "/api/hostgroups"),
    class("HttpProxy", "http-proxy", "/api/http_proxies"),
    class("LifecycleEnvironment", "lifecycle-environment", "/katello/api/environments"),
    class("Location", "location", "/api/locations"),
    class("Media", "medium", "/api/media"),
    class("OperatingSystem", "os", "/api/operatingsystems"),
    class("Org", "organization", "/katello/api/organizations"),
    class("PartitionTable", "partition-table", "/api/ptables"),
    EntityClass {
        name: "Permission",
        hammer: Some("filter"),
        api_path: Some("/api/permissions"),
        cli_list: "available-permissions",
    },
    class("Product", "product", "/katello/api/products"),
    class("ProvisioningTemplate", "template", "/api/provisioning_templates"),
    // Lower-level content job queue; only reachable over HTTP.
    EntityClass {
        name: "PulpTask",
        hammer: None,
        api_path: Some("/pulp/api/v3/tasks"),
        cli_list: "list",
    },
    class("Repository", "repository", "/katello/api/repositories"),
    class("RepositorySet", "repository-set", "/katello/api/repository_sets"),
    class("Role", "role", "/api/roles"),
    class("Setting", "settings", "/api/settings"),
    class("SmartProxy", "proxy", "/api/smart_proxies"),
    class("Subnet", "subnet", "/api/subnets"),
    class("Subscription", "subscription", "/katello/api/subscriptions"),
    class("SyncPlan", "sync-plan", "/katello/api/sync_plans"),
    class("User", "user", "/api/users"),
    class("UserGroup", "user-group", "/api/usergroups"),
];

/// Look up a class by exact name.
pub fn class_by_name(name: &str) -> Option<&'static EntityClass> {
    CLASSES.iter().find(|c| c.name == name)
}

pub fn class_names() -> Vec<&'static str> {
    CLASSES.iter().map(|c| c.name).collect()
}

/// Classes reachable through hammer.
pub fn cli_class_names() -> Vec<&'static str> {
    CLASSES
        .iter()
        .filter(|c| c.hammer.is_some())
        .map(|c| c.name)
        .collect()
}

/// Classes reachable through the REST API.
pub fn api_class_names() -> Vec<&'static str> {
    CLASSES
        .iter()
        .filter(|c| c.api_path.is_some())
        .map(|c| c.name)
        .collect()
}
