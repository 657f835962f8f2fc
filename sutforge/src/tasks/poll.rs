//! Polling waits for SUT background work.

use super::TaskError;
use crate::client::{EntityClient, options};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use sutforge_common::TaskHandle;
use sutforge_common::types::normalize_key;
use sutforge_common::util::display_value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const SYNC_TASK_LABEL: &str = "Actions::Katello::Repository::Sync";
pub const PUBLISH_TASK_LABEL: &str = "Actions::Katello::ContentView::Publish";
pub const PROMOTE_TASK_LABEL: &str = "Actions::Katello::ContentView::Promote";
pub const MANIFEST_IMPORT_LABEL: &str = "Actions::Katello::Organization::ManifestRefresh";
pub const GENERATE_APPLICABILITY_LABEL: &str = "Actions::Katello::Host::GenerateApplicability";
pub const UPLOAD_PROFILE_LABEL: &str = "Actions::Katello::Host::UploadPackageProfile";

/// Which tasks a wait is about: one or more labels plus filters on the
/// task input.
#[derive(Debug, Clone, Default)]
pub struct TaskSearch {
    labels: Vec<String>,
    input: Vec<(String, Value)>,
    extra: Vec<String>,
}

impl TaskSearch {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            labels: vec![label.into()],
            ..Default::default()
        }
    }

    /// Any of several labels.
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Require a dotted input path (`repository.id`) to equal `value`, or
    /// to contain it when the input holds a list.
    pub fn input(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.input.push((path.to_string(), value.into()));
        self
    }

    /// Extra server-side search clause.
    pub fn and(mut self, clause: impl Into<String>) -> Self {
        self.extra.push(clause.into());
        self
    }

    /// Server-side search string.
    pub fn query(&self) -> String {
        let mut terms = Vec::new();
        match self.labels.as_slice() {
            [] => {}
            [one] => terms.push(format!("label = {one}")),
            many => terms.push(format!(
                "({})",
                many.iter()
                    .map(|l| format!("label = {l}"))
                    .collect::<Vec<_>>()
                    .join(" or ")
            )),
        }
        terms.extend(self.extra.iter().cloned());
        terms.join(" and ")
    }

    /// Id of the entity the wait is about, for error messages.
    pub fn entity_id(&self) -> Option<String> {
        self.input.first().map(|(_, v)| display_value(v))
    }

    pub fn matches(&self, task: &TaskHandle) -> bool {
        (self.labels.is_empty() || self.labels.iter().any(|l| *l == task.label))
            && self.input.iter().all(|(path, expected)| {
                input_matches(lookup_input(&task.input, path), expected)
            })
    }
}

fn lookup_input<'a>(input: &'a serde_json::Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').map(normalize_key);
    let first = segments.next()?;
    segments.try_fold(input.get(&first)?, |value, segment| value.get(&segment))
}

fn input_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let expected = display_value(expected);
    match actual {
        Some(Value::Array(items)) => items.iter().any(|i| display_value(i) == expected),
        Some(value) => display_value(value) == expected,
        None => false,
    }
}

/// Identifies the repository whose sync job to wait for.
#[derive(Debug, Clone, Copy)]
pub enum RepoRef<'a> {
    BackendId(&'a str),
    Name(&'a str),
}

/// Budget for the errata applicability wait.
#[derive(Debug, Clone)]
pub struct ErrataWait {
    pub search_rate: Duration,
    pub max_tries: u32,
    pub poll_timeout: Duration,
}

impl Default for ErrataWait {
    fn default() -> Self {
        Self {
            search_rate: Duration::from_secs(1),
            max_tries: 10,
            poll_timeout: Duration::from_secs(15),
        }
    }
}

fn to_tasks(handles: Vec<sutforge_common::EntityHandle>) -> Vec<TaskHandle> {
    handles
        .into_iter()
        .filter_map(|h| TaskHandle::from_value(&h.into_value()))
        .collect()
}

fn check_success(task: TaskHandle) -> Result<TaskHandle, TaskError> {
    if task.succeeded() {
        Ok(task)
    } else {
        Err(TaskError::Failed {
            id: task.id,
            label: task.label,
            state: task.state,
            result: task.result,
        })
    }
}

/// Polls the SUT task list at a fixed cadence. Tasks are never cancelled;
/// a timed-out wait leaves the task running on the SUT.
#[derive(Clone)]
pub struct TaskPoller {
    client: EntityClient,
    interval: Duration,
}

impl TaskPoller {
    pub fn new(client: EntityClient) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client(&self) -> &EntityClient {
        &self.client
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until at least one task matches `search` and every matching
    /// task is terminal. Any unsuccessful match fails the wait.
    pub async fn wait_for_tasks(
        &self,
        search: &TaskSearch,
        timeout: Duration,
    ) -> Result<Vec<TaskHandle>, TaskError> {
        let query = search.query();
        let deadline = Instant::now() + timeout;
        debug!(query = %query, "Waiting for tasks");

        loop {
            let found = self
                .client
                .search(
                    "ForemanTask",
                    options([("search", Value::from(query.clone())), ("per-page", Value::from(1000))]),
                )
                .await?;
            let matching: Vec<TaskHandle> =
                to_tasks(found).into_iter().filter(|t| search.matches(t)).collect();

            if !matching.is_empty() && matching.iter().all(TaskHandle::is_terminal) {
                let count = matching.len();
                let done = matching
                    .into_iter()
                    .map(check_success)
                    .collect::<Result<Vec<_>, _>>()?;
                info!(query = %query, count, "Tasks finished");
                return Ok(done);
            }
            if Instant::now() >= deadline {
                return Err(TaskError::Timeout {
                    what: "tasks".into(),
                    query,
                    entity_id: search.entity_id(),
                    timeout,
                });
            }
            sleep(self.interval).await;
        }
    }

    /// Poll one task by id until it is terminal.
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<TaskHandle, TaskError> {
        let deadline = Instant::now() + timeout;
        loop {
            let handle = self.client.read("ForemanTask", task_id).await?;
            if let Some(task) = TaskHandle::from_value(&handle.into_value())
                && task.is_terminal()
            {
                debug!(task_id, label = %task.label, "Task finished");
                return check_success(task);
            }
            if Instant::now() >= deadline {
                return Err(TaskError::Timeout {
                    what: "task".into(),
                    query: format!("id = {task_id}"),
                    entity_id: Some(task_id.to_string()),
                    timeout,
                });
            }
            sleep(self.interval).await;
        }
    }

    /// Wait for the task an action started. If the action's output is a
    /// task record it is polled directly. A transport that blocks on its
    /// tasks has nothing left to wait for; otherwise `fallback` is searched.
    pub async fn wait_for_action(
        &self,
        output: &Value,
        fallback: &TaskSearch,
        timeout: Duration,
    ) -> Result<Vec<TaskHandle>, TaskError> {
        if let Some(task) = TaskHandle::from_value(output).filter(|t| !t.label.is_empty()) {
            return Ok(vec![self.wait_for_task(&task.id, timeout).await?]);
        }
        let transport = self.client.transport();
        if transport.waits_for_tasks() {
            debug!(
                transport = transport.kind(),
                query = %fallback.query(),
                "Action finished in the foreground"
            );
            return Ok(Vec::new());
        }
        self.wait_for_tasks(fallback, timeout).await
    }

    /// Wait for the applicability tasks a host triggers after `since`.
    ///
    /// The earliest matching task of each known label is polled to
    /// completion. Fails if no task shows up within the search budget.
    pub async fn wait_for_errata_applicability(
        &self,
        host_id: u64,
        since: DateTime<Utc>,
        wait: &ErrataWait,
    ) -> Result<Vec<TaskHandle>, TaskError> {
        let search = TaskSearch::labels([GENERATE_APPLICABILITY_LABEL, UPLOAD_PROFILE_LABEL]).and(
            format!("started_at >= \"{}\"", since.format("%Y-%m-%dT%H:%M:%S")),
        );
        let query = search.query();

        for attempt in 1..=wait.max_tries.max(1) {
            let found = self
                .client
                .search(
                    "ForemanTask",
                    options([("search", Value::from(query.clone())), ("per-page", Value::from(1000))]),
                )
                .await?;

            let mut earliest: BTreeMap<String, TaskHandle> = BTreeMap::new();
            for task in to_tasks(found) {
                if task.started_at.is_some_and(|t| t < since) {
                    continue;
                }
                let for_host = match task.label.as_str() {
                    GENERATE_APPLICABILITY_LABEL => {
                        input_matches(lookup_input(&task.input, "host_ids"), &Value::from(host_id))
                    }
                    UPLOAD_PROFILE_LABEL => {
                        input_matches(lookup_input(&task.input, "host.id"), &Value::from(host_id))
                    }
                    _ => false,
                };
                if !for_host {
                    continue;
                }
                let keep = earliest
                    .get(&task.label)
                    .is_none_or(|seen| task.started_at < seen.started_at);
                if keep {
                    earliest.insert(task.label.clone(), task);
                }
            }

            if !earliest.is_empty() {
                let mut done = Vec::with_capacity(earliest.len());
                for task in earliest.into_values() {
                    done.push(self.wait_for_task(&task.id, wait.poll_timeout).await?);
                }
                return Ok(done);
            }
            debug!(host_id, attempt, "No applicability task yet");
            sleep(wait.search_rate).await;
        }

        Err(TaskError::NotFound {
            query,
            entity_id: host_id.to_string(),
        })
    }

    /// Wait for the content job queue to finish syncing a repository.
    /// The deadline is `timeout_minutes * 60` seconds.
    pub async fn wait_for_repo_sync_job(
        &self,
        repo: RepoRef<'_>,
        timeout_minutes: u64,
    ) -> Result<Value, TaskError> {
        let backend_id = match repo {
            RepoRef::BackendId(id) => id.to_string(),
            RepoRef::Name(name) => {
                let query = format!("name = \"{name}\"");
                let found = self
                    .client
                    .find("Repository", &query, options([("per-page", 1000)]))
                    .await?;
                found
                    .as_ref()
                    .and_then(|r| r.get_str("backend-identifier"))
                    .map(str::to_string)
                    .ok_or_else(|| TaskError::NotFound {
                        query,
                        entity_id: name.to_string(),
                    })?
            }
        };

        let tag = format!("pulp:repository:{backend_id}");
        let timeout = Duration::from_secs(timeout_minutes * 60);
        let deadline = Instant::now() + timeout;
        loop {
            let jobs = self
                .client
                .search("PulpTask", options([("tags", tag.as_str())]))
                .await?;
            if let Some(job) = jobs.first() {
                if job.get_str("state") == Some("finished") {
                    info!(backend_id = %backend_id, "Repository sync job finished");
                    return Ok(job.clone().into_value());
                }
                if let Some(error) = job.get("error").filter(|e| !e.is_null()) {
                    return Err(TaskError::JobFailed {
                        backend_id,
                        error: display_value(error),
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(TaskError::Timeout {
                    what: "repository sync job".into(),
                    query: tag,
                    entity_id: Some(backend_id),
                    timeout,
                });
            }
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::RetryPolicy;
    use crate::transport::mock::{MockSut, MockSutConfig};
    use crate::transport::{Action, Request, Transport};
    use serde_json::json;
    use std::sync::Arc;

    fn poller(sut: &Arc<MockSut>) -> TaskPoller {
        let client = EntityClient::new(sut.clone()).with_read_retry(RetryPolicy::none());
        TaskPoller::new(client).with_interval(Duration::from_millis(1))
    }

    fn sut_with_polls(task_polls: u32) -> Arc<MockSut> {
        Arc::new(MockSut::with_config(MockSutConfig {
            task_polls,
            ..Default::default()
        }))
    }

    #[test]
    fn test_query_rendering() {
        assert_eq!(TaskSearch::label("A").query(), "label = A");
        assert_eq!(
            TaskSearch::labels(["A", "B"]).and("resource_id = 3").query(),
            "(label = A or label = B) and resource_id = 3"
        );
    }

    #[test]
    fn test_input_matching() {
        let task = TaskHandle::from_value(&json!({
            "id": "t",
            "label": "A",
            "state": "stopped",
            "result": "success",
            "input": {"repository": {"id": 5}, "host-ids": [1, 2]},
        }))
        .unwrap();
        assert!(TaskSearch::label("A").input("repository.id", 5).matches(&task));
        assert!(TaskSearch::label("A").input("host_ids", 2).matches(&task));
        assert!(!TaskSearch::label("A").input("repository.id", 6).matches(&task));
        assert!(!TaskSearch::label("B").matches(&task));
    }

    #[tokio::test]
    async fn test_wait_for_tasks_returns_after_all_finish() {
        let sut = sut_with_polls(3);
        sut.spawn_task("Actions::Sync", json!({"repository": {"id": 1}}), Some(1));
        sut.spawn_task("Actions::Sync", json!({"repository": {"id": 1}}), Some(1));
        sut.spawn_task("Actions::Sync", json!({"repository": {"id": 2}}), Some(2));

        let search = TaskSearch::label("Actions::Sync").input("repository.id", 1);
        let tasks = poller(&sut)
            .wait_for_tasks(&search, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(TaskHandle::succeeded));
    }

    #[tokio::test]
    async fn test_wait_for_tasks_times_out_with_query_and_id() {
        let sut = sut_with_polls(1);
        let search = TaskSearch::label("Actions::Never").input("repository.id", 42);
        let err = poller(&sut)
            .wait_for_tasks(&search, Duration::from_millis(20))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("label = Actions::Never"), "{message}");
        assert!(message.contains("id: 42"), "{message}");
        assert_eq!(err.code(), sutforge_common::ErrorCode::TaskTimeout);
    }

    #[tokio::test]
    async fn test_failed_task_fails_the_wait() {
        let sut = sut_with_polls(1);
        sut.fail_tasks_labelled("Actions::Broken");
        let id = sut.spawn_task("Actions::Broken", json!({}), None);
        let err = poller(&sut)
            .wait_for_task(&id, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_blocking_cli_action_needs_no_task_search() {
        use crate::transport::cli::CliTransport;
        use crate::transport::mock::MockExecutor;
        use sutforge_common::Credentials;

        let executor = Arc::new(MockExecutor::new("sut.test"));
        executor.push_output(
            0,
            "[.................] [100%]\nRepository \"r\" synchronized.\n",
            "",
        );
        let cli = Arc::new(CliTransport::with_credentials(executor.clone(), Credentials::new("admin", "x")));
        let client = EntityClient::new(cli).with_read_retry(RetryPolicy::none());
        let output = client
            .action("Repository", "sync", options([("id", 3)]))
            .await
            .unwrap();

        let tasks = TaskPoller::new(client)
            .with_interval(Duration::from_millis(1))
            .wait_for_action(
                &output,
                &TaskSearch::label("Actions::Katello::Repository::Sync").input("repository.id", 3),
                Duration::from_millis(30),
            )
            .await
            .unwrap();
        assert!(tasks.is_empty());
        // Only the synchronize ran; no task list was issued.
        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("repository synchronize"), "{}", commands[0]);
    }

    #[tokio::test]
    async fn test_wait_for_action_polls_returned_task() {
        let sut = sut_with_polls(2);
        let repo = sut.seed("Repository", json!({"name": "r"}));
        let output = sut
            .call(Request::new("Repository", Action::Custom("sync".into())).option("id", repo))
            .await
            .unwrap()
            .output;
        let tasks = poller(&sut)
            .wait_for_action(&output, &TaskSearch::label("unused"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(tasks[0].label, crate::transport::mock::SYNC_TASK_LABEL);
    }

    #[tokio::test]
    async fn test_errata_applicability_picks_earliest_per_label() {
        let sut = sut_with_polls(2);
        let since = Utc::now() - chrono::Duration::seconds(1);
        sut.spawn_task(GENERATE_APPLICABILITY_LABEL, json!({"host_ids": [7]}), None);
        sut.spawn_task(GENERATE_APPLICABILITY_LABEL, json!({"host_ids": [7]}), None);
        sut.spawn_task(UPLOAD_PROFILE_LABEL, json!({"host": {"id": 7}}), None);
        sut.spawn_task(UPLOAD_PROFILE_LABEL, json!({"host": {"id": 8}}), None);

        let wait = ErrataWait {
            search_rate: Duration::from_millis(1),
            max_tries: 3,
            poll_timeout: Duration::from_secs(1),
        };
        let tasks = poller(&sut)
            .wait_for_errata_applicability(7, since, &wait)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(TaskHandle::succeeded));
    }

    #[tokio::test]
    async fn test_errata_applicability_not_found() {
        let sut = sut_with_polls(1);
        let wait = ErrataWait {
            search_rate: Duration::from_millis(1),
            max_tries: 2,
            poll_timeout: Duration::from_secs(1),
        };
        let err = poller(&sut)
            .wait_for_errata_applicability(7, Utc::now(), &wait)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { ref entity_id, .. } if entity_id == "7"));
    }

    #[tokio::test]
    async fn test_repo_sync_job_by_name() {
        let sut = sut_with_polls(2);
        let repo = sut.seed("Repository", json!({"name": "zoo", "backend-identifier": "abc-1"}));
        sut.call(Request::new("Repository", Action::Custom("sync".into())).option("id", repo))
            .await
            .unwrap();
        let job = poller(&sut)
            .wait_for_repo_sync_job(RepoRef::Name("zoo"), 1)
            .await
            .unwrap();
        assert_eq!(job["state"], json!("finished"));
    }

    #[tokio::test]
    async fn test_repo_sync_job_unknown_repo() {
        let sut = sut_with_polls(1);
        let err = poller(&sut)
            .wait_for_repo_sync_job(RepoRef::Name("missing"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }
}
