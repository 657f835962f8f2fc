//! In-memory SUT and SSH executor for tests.
//!
//! [`MockSut`] implements [`Transport`] over a small record store. It
//! assigns ids, simulates background tasks that finish after a number of
//! polls, keeps content-view versions, subscriptions, settings and
//! template lock state, and rejects overlapping manifest uploads for the
//! same organisation the way the real SUT does. Every request is recorded.
//!
//! [`MockExecutor`] implements [`RemoteExecutor`] with scripted outputs.

use super::catalog::{class_by_name, class_names};
use super::{
    Action, CommandOutput, RemoteExecutor, Request, SshError, Transport, TransportError,
    TransportResult,
};
use crate::setup::DEFAULT_SUBSCRIPTION_NAME;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use sutforge_common::casts::cast_bool;
use sutforge_common::types::{normalize_key, normalize_keys};
use sutforge_common::util::display_value;
use sutforge_common::{EntityHandle, TaskHandle};
use tracing::debug;

/// Options that steer a list call rather than filter records.
const LIST_CONTROL_OPTIONS: &[&str] = &["search", "per-page", "page", "order", "full-result"];

pub use crate::tasks::poll::{PROMOTE_TASK_LABEL, PUBLISH_TASK_LABEL, SYNC_TASK_LABEL};

// ============================================================================
// MockExecutor
// ============================================================================

/// Scripted SSH executor. Outputs are consumed in order; `cat <path>`
/// falls back to previously uploaded content.
pub struct MockExecutor {
    host: String,
    outputs: Mutex<VecDeque<CommandOutput>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outputs: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_output(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.outputs
            .lock()
            .expect("mock outputs mutex poisoned")
            .push_back(CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                duration: Duration::ZERO,
            });
    }

    /// Seed a remote file.
    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .expect("mock files mutex poisoned")
            .insert(path.to_string(), content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .expect("mock files mutex poisoned")
            .get(path)
            .cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .expect("mock commands mutex poisoned")
            .clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads
            .lock()
            .expect("mock uploads mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(
        &self,
        command: &str,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, SshError> {
        self.commands
            .lock()
            .expect("mock commands mutex poisoned")
            .push(command.to_string());

        if let Some(output) = self
            .outputs
            .lock()
            .expect("mock outputs mutex poisoned")
            .pop_front()
        {
            return Ok(output);
        }
        if let Some(path) = command.strip_prefix("cat ") {
            let path = path.trim().trim_matches('\'');
            if let Some(content) = self.file(path) {
                return Ok(CommandOutput {
                    exit_code: 0,
                    stdout: String::from_utf8_lossy(&content).into_owned(),
                    stderr: String::new(),
                    duration: Duration::ZERO,
                });
            }
        }
        Err(SshError::Exec {
            host: self.host.clone(),
            message: format!("no scripted output for: {command}"),
        })
    }

    async fn upload(&self, remote_path: &str, content: &[u8]) -> Result<(), SshError> {
        self.uploads
            .lock()
            .expect("mock uploads mutex poisoned")
            .push((remote_path.to_string(), content.to_vec()));
        self.put_file(remote_path, content);
        Ok(())
    }
}

// ============================================================================
// MockSut
// ============================================================================

#[derive(Debug, Clone)]
struct MockTask {
    id: String,
    label: String,
    input: Value,
    resource_id: Option<u64>,
    polls_left: u32,
    fails: bool,
    started_at: DateTime<Utc>,
}

impl MockTask {
    fn finished(&self) -> bool {
        self.polls_left == 0
    }

    /// One observation moves the task one step closer to finishing.
    fn observe(&mut self) {
        self.polls_left = self.polls_left.saturating_sub(1);
    }

    fn to_value(&self) -> Value {
        let (state, result) = match (self.finished(), self.fails) {
            (false, _) => ("running", "pending"),
            (true, false) => ("stopped", "success"),
            (true, true) => ("stopped", "error"),
        };
        json!({
            "id": self.id,
            "label": self.label,
            "state": state,
            "result": result,
            "input": self.input,
            "resource-id": self.resource_id,
            "started-at": self.started_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone)]
struct MockJob {
    href: String,
    backend_id: String,
    polls_left: u32,
}

impl MockJob {
    fn to_value(&self) -> Value {
        let state = if self.polls_left == 0 { "finished" } else { "running" };
        json!({
            "pulp-href": self.href,
            "state": state,
            "error": null,
            "tags": [format!("pulp:repository:{}", self.backend_id)],
        })
    }
}

struct ScriptedFailure {
    class: String,
    action: Option<Action>,
    error: TransportError,
}

#[derive(Default)]
struct SutState {
    next_id: u64,
    records: BTreeMap<String, BTreeMap<u64, Map<String, Value>>>,
    tasks: Vec<MockTask>,
    jobs: Vec<MockJob>,
    failing_labels: Vec<String>,
    failures: VecDeque<ScriptedFailure>,
    requests: Vec<Request>,
    uploads_in_flight: HashMap<u64, u32>,
    max_uploads_in_flight: HashMap<u64, u32>,
    upload_count: HashMap<u64, u32>,
}

impl SutState {
    fn insert(&mut self, class: &str, mut record: Map<String, Value>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        record.insert("id".into(), json!(id));
        self.records
            .entry(class.to_string())
            .or_default()
            .insert(id, record);
        id
    }

    fn get(&self, class: &str, id: u64) -> Option<&Map<String, Value>> {
        self.records.get(class)?.get(&id)
    }

    fn get_mut(&mut self, class: &str, id: u64) -> Option<&mut Map<String, Value>> {
        self.records.get_mut(class)?.get_mut(&id)
    }

    fn find(&self, class: &str, pred: impl Fn(&Map<String, Value>) -> bool) -> Option<u64> {
        self.records
            .get(class)?
            .iter()
            .find(|(_, r)| pred(r))
            .map(|(id, _)| *id)
    }

    fn spawn_task(&mut self, label: &str, input: Value, resource_id: Option<u64>, polls: u32) -> Value {
        let task = MockTask {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            input,
            resource_id,
            polls_left: polls,
            fails: self.failing_labels.iter().any(|l| l == label),
            started_at: Utc::now(),
        };
        let value = task.to_value();
        self.tasks.push(task);
        value
    }
}

/// Knobs for the simulated SUT.
#[derive(Debug, Clone)]
pub struct MockSutConfig {
    /// Observations before a task or job finishes.
    pub task_polls: u32,
    /// Time a manifest upload holds the organisation busy.
    pub upload_delay: Duration,
    /// Repository sets (name, product) a manifest makes available.
    pub repository_sets: Vec<(String, String)>,
    /// Quantity of the manifest's subscription.
    pub manifest_quantity: i64,
}

impl Default for MockSutConfig {
    fn default() -> Self {
        Self {
            task_polls: 1,
            upload_delay: Duration::from_millis(50),
            repository_sets: vec![(
                "Red Hat Enterprise Linux 7 Server (RPMs)".to_string(),
                "Red Hat Enterprise Linux Server".to_string(),
            )],
            manifest_quantity: 10,
        }
    }
}

pub struct MockSut {
    state: Mutex<SutState>,
    config: MockSutConfig,
}

impl Default for MockSut {
    fn default() -> Self {
        Self::new()
    }
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn not_found(class: &str, id: &str) -> TransportError {
    TransportError::Http {
        status: 404,
        method: "GET".into(),
        url: format!("mock://{class}/{id}"),
        body: format!("Resource {class} not found by id '{id}'"),
    }
}

fn unprocessable(class: &str, message: impl Into<String>) -> TransportError {
    TransportError::Http {
        status: 422,
        method: "POST".into(),
        url: format!("mock://{class}"),
        body: message.into(),
    }
}

fn unauthorized(login: &str) -> TransportError {
    TransportError::Http {
        status: 401,
        method: "GET".into(),
        url: "mock://User".into(),
        body: format!("Unable to authenticate user {login}"),
    }
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl MockSut {
    pub fn new() -> Self {
        Self::with_config(MockSutConfig::default())
    }

    pub fn with_config(config: MockSutConfig) -> Self {
        let sut = Self {
            state: Mutex::new(SutState::default()),
            config,
        };
        sut.seed_defaults();
        sut
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SutState> {
        self.state.lock().expect("mock SUT mutex poisoned")
    }

    fn seed_defaults(&self) {
        let mut st = self.lock();
        for (name, value) in [
            ("foreman_url", json!("https://sut.example.test")),
            ("entries_per_page", json!(20)),
            ("destroy_vm_on_host_delete", json!(true)),
            ("outofsync_interval", json!(30)),
        ] {
            st.insert("Setting", obj(json!({"name": name, "value": value})));
        }
        st.insert(
            "User",
            obj(json!({"login": "admin", "admin": true, "password": "changeme"})),
        );
        st.insert("Architecture", obj(json!({"name": "x86_64"})));
        st.insert(
            "PartitionTable",
            obj(json!({"name": "Kickstart default", "os-family": "Redhat", "locked": true})),
        );
        for (name, kind) in [
            ("Kickstart default", "provision"),
            ("Kickstart default PXELinux", "PXELinux"),
        ] {
            st.insert(
                "ProvisioningTemplate",
                obj(json!({"name": name, "template-kind": kind, "locked": true})),
            );
        }
        st.insert(
            "SmartProxy",
            obj(json!({"name": "sut.example.test", "url": "https://sut.example.test:9090"})),
        );
        let permissions: &[(&str, &[&str])] = &[
            (
                "Architecture",
                &["view_architectures", "create_architectures", "edit_architectures", "destroy_architectures"],
            ),
            ("Domain", &["view_domains", "create_domains", "edit_domains", "destroy_domains"]),
            ("Host", &["view_hosts", "create_hosts", "edit_hosts", "destroy_hosts"]),
            (
                "Katello::ActivationKey",
                &["view_activation_keys", "create_activation_keys", "edit_activation_keys"],
            ),
            ("Organization", &["view_organizations", "edit_organizations"]),
        ];
        for (resource, names) in permissions {
            for name in *names {
                st.insert(
                    "Permission",
                    obj(json!({"name": name, "resource-type": resource})),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------

    /// Reject a known user whose recorded password differs. Unknown logins
    /// and users without a recorded password pass.
    fn authenticate(&self, login: &str, password: &str) -> Result<(), TransportError> {
        let st = self.lock();
        let Some(id) = st.find("User", |r| r.get("login").and_then(Value::as_str) == Some(login)) else {
            return Ok(());
        };
        match st.get("User", id).and_then(|u| u.get("password")).and_then(Value::as_str) {
            Some(recorded) if recorded != password => Err(unauthorized(login)),
            _ => Ok(()),
        }
    }

    /// Insert a record and return its id.
    pub fn seed(&self, class: &str, record: Value) -> u64 {
        self.lock().insert(class, obj(normalize_keys(record)))
    }

    /// Fail the next matching call. `action: None` matches any action.
    pub fn fail_next(&self, class: &str, action: Option<Action>, error: TransportError) {
        self.lock().failures.push_back(ScriptedFailure {
            class: class.to_string(),
            action,
            error,
        });
    }

    /// Tasks with this label finish with `result: error`.
    pub fn fail_tasks_labelled(&self, label: &str) {
        self.lock().failing_labels.push(label.to_string());
    }

    /// Start a task as the SUT would in the background.
    pub fn spawn_task(&self, label: &str, input: Value, resource_id: Option<u64>) -> String {
        let polls = self.config.task_polls;
        let task = self.lock().spawn_task(label, normalize_keys(input), resource_id, polls);
        task["id"].as_str().unwrap_or_default().to_string()
    }

    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.lock()
            .tasks
            .iter()
            .filter_map(|t| TaskHandle::from_value(&t.to_value()))
            .collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, class: &str, action: &Action) -> Vec<Request> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.class == class && &r.action == action)
            .cloned()
            .collect()
    }

    pub fn records(&self, class: &str) -> Vec<EntityHandle> {
        self.lock()
            .records
            .get(class)
            .map(|m| m.values().cloned().map(EntityHandle::new).collect())
            .unwrap_or_default()
    }

    pub fn record(&self, class: &str, id: u64) -> Option<EntityHandle> {
        self.lock().get(class, id).cloned().map(EntityHandle::new)
    }

    /// Current value of a SUT setting.
    pub fn setting_value(&self, name: &str) -> Option<Value> {
        let st = self.lock();
        let id = st.find("Setting", |r| r.get("name").and_then(Value::as_str) == Some(name))?;
        st.get("Setting", id)?.get("value").cloned()
    }

    pub fn upload_count(&self, org_id: u64) -> u32 {
        self.lock().upload_count.get(&org_id).copied().unwrap_or(0)
    }

    /// Highest number of overlapping uploads seen for an organisation.
    pub fn max_concurrent_uploads(&self, org_id: u64) -> u32 {
        self.lock()
            .max_uploads_in_flight
            .get(&org_id)
            .copied()
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Request handling
    // ------------------------------------------------------------------

    fn take_failure(&self, request: &Request) -> Option<TransportError> {
        let mut st = self.lock();
        let pos = st.failures.iter().position(|f| {
            f.class == request.class && f.action.as_ref().is_none_or(|a| a == &request.action)
        })?;
        st.failures.remove(pos).map(|f| f.error)
    }

    fn require_id(request: &Request) -> Result<u64, TransportError> {
        as_u64(request.options.get("id"))
            .ok_or_else(|| unprocessable(&request.class, "Missing required option 'id'"))
    }

    fn create(&self, class: &str, options: Map<String, Value>) -> Result<Value, TransportError> {
        let mut st = self.lock();
        let mut record: Map<String, Value> = options
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();
        record.remove("id");

        match class {
            "Org" => {
                if let Some(name) = record.get("name").cloned() {
                    record.entry("label").or_insert(name);
                }
            }
            "Repository" => {
                record.insert(
                    "backend-identifier".into(),
                    json!(uuid::Uuid::new_v4().to_string()),
                );
            }
            "ContentView" => {
                let repos = record
                    .get("repository-ids")
                    .filter(|v| v.is_array())
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                record.insert("repository-ids".into(), repos);
                record.insert("version-ids".into(), json!([]));
            }
            "ActivationKey" => {
                record.insert("subscriptions".into(), json!([]));
            }
            _ => {}
        }

        let id = st.insert(class, record);
        match class {
            "Org" => {
                st.insert(
                    "LifecycleEnvironment",
                    obj(json!({"name": "Library", "library": true, "organization-id": id})),
                );
            }
            "Product" => {
                let product = st.get(class, id).cloned().unwrap_or_default();
                st.insert(
                    "Subscription",
                    obj(json!({
                        "name": product.get("name"),
                        "product-id": id,
                        "organization-id": product.get("organization-id"),
                        "quantity": -1,
                    })),
                );
            }
            _ => {}
        }
        let created = st.get(class, id).cloned().unwrap_or_default();
        Ok(Value::Object(created))
    }

    fn list(&self, request: &Request) -> Value {
        let mut st = self.lock();
        let search = request
            .options
            .get("search")
            .and_then(Value::as_str)
            .map(str::to_string);
        let filters: Vec<(String, Value)> = request
            .options
            .iter()
            .filter(|(k, v)| !v.is_null() && !LIST_CONTROL_OPTIONS.contains(&k.as_str()))
            .map(|(k, v)| (normalize_key(k), v.clone()))
            .collect();
        let keep = |record: &Map<String, Value>| {
            filters.iter().all(|(k, v)| field_matches(record.get(k), v))
                && search.as_deref().is_none_or(|s| matches_search(record, s))
        };

        let items: Vec<Value> = match request.class.as_str() {
            "ForemanTask" => {
                for task in &mut st.tasks {
                    task.observe();
                }
                st.tasks
                    .iter()
                    .map(MockTask::to_value)
                    .filter(|v| v.as_object().is_some_and(&keep))
                    .collect()
            }
            "PulpTask" => {
                for job in &mut st.jobs {
                    job.polls_left = job.polls_left.saturating_sub(1);
                }
                st.jobs
                    .iter()
                    .map(MockJob::to_value)
                    .filter(|v| v.as_object().is_some_and(&keep))
                    .collect()
            }
            class => st
                .records
                .get(class)
                .map(|records| {
                    records
                        .values()
                        .filter(|r| keep(*r))
                        .cloned()
                        .map(Value::Object)
                        .collect()
                })
                .unwrap_or_default(),
        };
        Value::Array(items)
    }

    fn info(&self, request: &Request) -> Result<Value, TransportError> {
        let raw_id = request.id().unwrap_or_default();
        let mut st = self.lock();
        if request.class == "ForemanTask" {
            let task = st
                .tasks
                .iter_mut()
                .find(|t| t.id == raw_id)
                .ok_or_else(|| not_found("ForemanTask", &raw_id))?;
            task.observe();
            return Ok(task.to_value());
        }
        let id = Self::require_id(request)?;
        st.get(&request.class, id)
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| not_found(&request.class, &raw_id))
    }

    fn update(&self, request: &Request) -> Result<Value, TransportError> {
        let id = Self::require_id(request)?;
        let mut st = self.lock();
        let record = st
            .get_mut(&request.class, id)
            .ok_or_else(|| not_found(&request.class, &id.to_string()))?;
        for (key, value) in &request.options {
            if key == "id" || value.is_null() {
                continue;
            }
            let key = normalize_key(key);
            // Flags set from the CLI arrive as strings.
            let value = match (record.get(&key), value) {
                (Some(Value::Bool(_)), Value::String(s)) => {
                    cast_bool(s).map(Value::Bool).unwrap_or_else(|_| value.clone())
                }
                _ => value.clone(),
            };
            record.insert(key, value);
        }
        Ok(Value::Object(record.clone()))
    }

    fn delete(&self, request: &Request) -> Result<Value, TransportError> {
        let id = Self::require_id(request)?;
        let mut st = self.lock();
        st.records
            .get_mut(&request.class)
            .and_then(|m| m.remove(&id))
            .ok_or_else(|| not_found(&request.class, &id.to_string()))?;
        Ok(json!({"message": format!("{} deleted", request.class)}))
    }

    async fn custom(&self, request: &Request, action: &str) -> Result<Value, TransportError> {
        let polls = self.config.task_polls;
        match (request.class.as_str(), action) {
            ("Repository", "sync") => {
                let id = Self::require_id(request)?;
                let mut st = self.lock();
                let repo = st
                    .get(&request.class, id)
                    .cloned()
                    .ok_or_else(|| not_found("Repository", &id.to_string()))?;
                let backend_id = repo
                    .get("backend-identifier")
                    .map(display_value)
                    .unwrap_or_default();
                st.jobs.push(MockJob {
                    href: format!("/pulp/api/v3/tasks/{}/", uuid::Uuid::new_v4()),
                    backend_id,
                    polls_left: polls,
                });
                if let Some(record) = st.get_mut("Repository", id) {
                    record.insert("last-sync".into(), json!(Utc::now().to_rfc3339()));
                }
                Ok(st.spawn_task(SYNC_TASK_LABEL, json!({"repository": {"id": id}}), Some(id), polls))
            }
            ("ContentView", "publish") => {
                let id = Self::require_id(request)?;
                let mut st = self.lock();
                let cv = st
                    .get("ContentView", id)
                    .cloned()
                    .ok_or_else(|| not_found("ContentView", &id.to_string()))?;
                let number = cv
                    .get("version-ids")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len)
                    + 1;
                let library = st.find("LifecycleEnvironment", |r| {
                    r.get("library") == Some(&json!(true))
                        && r.get("organization-id") == cv.get("organization-id")
                });
                let version_id = st.insert(
                    "ContentViewVersion",
                    obj(json!({
                        "content-view-id": id,
                        "version": format!("{number}.0"),
                        "environment-ids": library.map(|l| vec![l]).unwrap_or_default(),
                        "repository-ids": cv.get("repository-ids"),
                    })),
                );
                if let Some(Value::Array(versions)) =
                    st.get_mut("ContentView", id).and_then(|r| r.get_mut("version-ids"))
                {
                    versions.push(json!(version_id));
                }
                Ok(st.spawn_task(
                    PUBLISH_TASK_LABEL,
                    json!({"content-view": {"id": id}, "content-view-version-id": version_id}),
                    Some(id),
                    polls,
                ))
            }
            ("ContentViewVersion", "promote") => {
                let id = Self::require_id(request)?;
                let env = as_u64(request.options.get("to-lifecycle-environment-id"))
                    .ok_or_else(|| {
                        unprocessable("ContentViewVersion", "Missing option 'to-lifecycle-environment-id'")
                    })?;
                let mut st = self.lock();
                let version = st
                    .get_mut("ContentViewVersion", id)
                    .ok_or_else(|| not_found("ContentViewVersion", &id.to_string()))?;
                if let Some(Value::Array(envs)) = version.get_mut("environment-ids")
                    && !envs.contains(&json!(env))
                {
                    envs.push(json!(env));
                }
                let cv_id = version.get("content-view-id").cloned();
                Ok(st.spawn_task(
                    PROMOTE_TASK_LABEL,
                    json!({"content-view": {"id": cv_id}, "environment-ids": [env]}),
                    Some(id),
                    polls,
                ))
            }
            ("ContentView", "add-repository") => {
                let id = Self::require_id(request)?;
                let repo = request.options.get("repository-id").cloned().unwrap_or(Value::Null);
                let repo = as_u64(Some(&repo)).map(Value::from).unwrap_or(repo);
                let mut st = self.lock();
                let cv = st
                    .get_mut("ContentView", id)
                    .ok_or_else(|| not_found("ContentView", &id.to_string()))?;
                if let Some(Value::Array(repos)) = cv.get_mut("repository-ids")
                    && !repos.contains(&repo)
                {
                    repos.push(repo);
                }
                Ok(json!({"message": "The repository has been associated."}))
            }
            ("ActivationKey", "add-subscription") => {
                let id = Self::require_id(request)?;
                let sub_id = as_u64(request.options.get("subscription-id")).ok_or_else(|| {
                    unprocessable("ActivationKey", "Missing option 'subscription-id'")
                })?;
                let quantity = as_u64(request.options.get("quantity")).unwrap_or(1);
                let mut st = self.lock();
                if st.get("Subscription", sub_id).is_none() {
                    return Err(not_found("Subscription", &sub_id.to_string()));
                }
                let ak = st
                    .get_mut("ActivationKey", id)
                    .ok_or_else(|| not_found("ActivationKey", &id.to_string()))?;
                if let Some(Value::Array(subs)) = ak.get_mut("subscriptions") {
                    subs.push(json!({"id": sub_id, "quantity": quantity}));
                }
                Ok(json!({"message": "Subscription added to activation key."}))
            }
            ("RepositorySet", "enable") => {
                let id = Self::require_id(request)?;
                let mut st = self.lock();
                let set = st
                    .get("RepositorySet", id)
                    .cloned()
                    .ok_or_else(|| not_found("RepositorySet", &id.to_string()))?;
                let set_name = set.get("name").map(display_value).unwrap_or_default();
                let basearch = request.options.get("basearch").map(display_value);
                let releasever = request.options.get("releasever").map(display_value);
                let repo_name = [Some(set_name.replace(" (RPMs)", " RPMs")), basearch.clone(), releasever.clone()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                let product_id = set.get("product-id").cloned();
                let existing = st.find("Repository", |r| {
                    r.get("name").and_then(Value::as_str) == Some(repo_name.as_str())
                        && r.get("product-id") == product_id.as_ref()
                });
                if existing.is_none() {
                    st.insert(
                        "Repository",
                        obj(json!({
                            "name": repo_name,
                            "product-id": product_id,
                            "organization-id": set.get("organization-id"),
                            "content-type": "yum",
                            "repository-set-id": id,
                            "backend-identifier": uuid::Uuid::new_v4().to_string(),
                        })),
                    );
                }
                Ok(json!({"message": "Repository enabled."}))
            }
            ("Subscription", "upload") => self.upload_manifest(request).await,
            (class, action) => Err(TransportError::Unsupported {
                transport: "mock",
                class: class.to_string(),
                action: action.to_string(),
            }),
        }
    }

    async fn upload_manifest(&self, request: &Request) -> Result<Value, TransportError> {
        let org_id = as_u64(request.options.get("organization-id"))
            .ok_or_else(|| unprocessable("Subscription", "Missing option 'organization-id'"))?;
        if request.attachment.is_none() && !request.options.contains_key("file") {
            return Err(unprocessable("Subscription", "No manifest file given"));
        }

        {
            let mut st = self.lock();
            let in_flight = st.uploads_in_flight.entry(org_id).or_insert(0);
            *in_flight += 1;
            let now = *in_flight;
            let max = st.max_uploads_in_flight.entry(org_id).or_insert(0);
            *max = (*max).max(now);
            if now > 1 {
                if let Some(n) = st.uploads_in_flight.get_mut(&org_id) {
                    *n -= 1;
                }
                return Err(TransportError::Http {
                    status: 409,
                    method: "POST".into(),
                    url: "mock://Subscription/upload".into(),
                    body: format!("Another manifest import is in progress for organization {org_id}"),
                });
            }
        }

        tokio::time::sleep(self.config.upload_delay).await;

        let mut st = self.lock();
        if let Some(n) = st.uploads_in_flight.get_mut(&org_id) {
            *n -= 1;
        }
        *st.upload_count.entry(org_id).or_insert(0) += 1;

        // A re-upload refreshes the existing manifest content.
        let seeded = st
            .find("Subscription", |r| {
                r.get("name").and_then(Value::as_str) == Some(DEFAULT_SUBSCRIPTION_NAME)
                    && as_u64(r.get("organization-id")) == Some(org_id)
            })
            .is_some();
        if !seeded {
            let mut products: BTreeMap<String, u64> = BTreeMap::new();
            for (set_name, product_name) in &self.config.repository_sets {
                let product_id = match products.get(product_name) {
                    Some(id) => *id,
                    None => {
                        let id = st.insert(
                            "Product",
                            obj(json!({"name": product_name, "organization-id": org_id, "redhat": true})),
                        );
                        products.insert(product_name.clone(), id);
                        id
                    }
                };
                st.insert(
                    "RepositorySet",
                    obj(json!({"name": set_name, "product-id": product_id, "organization-id": org_id})),
                );
            }
            st.insert(
                "Subscription",
                obj(json!({
                    "name": DEFAULT_SUBSCRIPTION_NAME,
                    "organization-id": org_id,
                    "product-ids": products.values().collect::<Vec<_>>(),
                    "quantity": self.config.manifest_quantity,
                })),
            );
        }
        debug!(org_id, "Mock manifest imported");
        Ok(json!({"message": "Manifest is being uploaded."}))
    }
}

#[async_trait]
impl Transport for MockSut {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn classes(&self) -> Vec<&'static str> {
        class_names()
    }

    async fn call(&self, request: Request) -> Result<TransportResult, TransportError> {
        self.lock().requests.push(request.clone());
        if let Some(error) = self.take_failure(&request) {
            return Err(error);
        }
        if let Some(credentials) = &request.credentials {
            self.authenticate(&credentials.login, &credentials.password)?;
        }
        if class_by_name(&request.class).is_none() {
            return Err(TransportError::UnknownClass(request.class.clone()));
        }

        let output = match &request.action {
            Action::Create => self.create(&request.class, request.options.clone())?,
            Action::Info => self.info(&request)?,
            Action::List => self.list(&request),
            Action::Update => self.update(&request)?,
            Action::Delete => self.delete(&request)?,
            Action::Custom(name) => self.custom(&request, name).await?,
        };
        Ok(TransportResult::new(normalize_keys(output)))
    }
}

// ============================================================================
// Search evaluation
// ============================================================================

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return true;
    };
    if actual == expected {
        return true;
    }
    let expected_str = display_value(expected);
    match actual {
        Value::Array(items) => items.iter().any(|i| display_value(i) == expected_str),
        other => display_value(other) == expected_str,
    }
}

/// Split at `sep` outside parentheses and quotes.
fn split_top_level<'a>(input: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut start = 0;
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => depth -= 1,
            _ => {}
        }
        if depth == 0 && !in_quotes && input[i..].starts_with(sep) {
            parts.push(&input[start..i]);
            i += sep.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

fn strip_parens(term: &str) -> &str {
    let term = term.trim();
    term.strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(term)
}

fn matches_atom(record: &Map<String, Value>, atom: &str) -> bool {
    let atom = atom.trim();
    let Some((field, op, value)) = ["!=", ">=", "<=", "~", "="]
        .iter()
        .find_map(|op| atom.split_once(op).map(|(f, v)| (f, *op, v)))
    else {
        return false;
    };
    let value = value.trim().trim_matches('"');
    let actual = record
        .get(&normalize_key(field))
        .filter(|v| !v.is_null())
        .map(display_value);
    match (op, actual) {
        ("=", Some(a)) => a == value,
        ("!=", a) => a.as_deref() != Some(value),
        ("~", Some(a)) => a.contains(value),
        (">=", Some(a)) => a.as_str() >= value,
        ("<=", Some(a)) => a.as_str() <= value,
        _ => false,
    }
}

/// Evaluate a scoped-search string: `and`-joined terms, each optionally a
/// parenthesised `or` group of `field op value` atoms.
pub fn matches_search(record: &Map<String, Value>, search: &str) -> bool {
    if search.trim().is_empty() {
        return true;
    }
    split_top_level(search, " and ").into_iter().all(|term| {
        split_top_level(strip_parens(term), " or ")
            .into_iter()
            .any(|atom| matches_atom(record, atom))
    })
}
