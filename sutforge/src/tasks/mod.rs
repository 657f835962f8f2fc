//! Task polling and retries.
//!
//! Two surfaces: [`retry::retry`] wraps idempotent calls, and
//! [`poll::TaskPoller`] waits for SUT background work (tasks, errata
//! applicability, repository sync jobs) under an explicit deadline.

pub mod poll;
pub mod retry;

use crate::transport::TransportError;
use std::time::Duration;
use sutforge_common::{ErrorCode, TaskOutcome, TaskState};
use thiserror::Error;

pub use poll::{ErrataWait, RepoRef, TaskPoller, TaskSearch};
pub use retry::{RetryPolicy, Retryable, retry};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(
        "Timed out after {} waiting for {what} (search: {query}, id: {})",
        humantime::format_duration(*.timeout),
        .entity_id.as_deref().unwrap_or("-")
    )]
    Timeout {
        what: String,
        query: String,
        entity_id: Option<String>,
        timeout: Duration,
    },

    #[error("Task {id} ({label}) ended in state {state:?} with result {result:?}")]
    Failed {
        id: String,
        label: String,
        state: TaskState,
        result: TaskOutcome,
    },

    #[error("No task was found using query {query} for id: {entity_id}")]
    NotFound { query: String, entity_id: String },

    #[error("Sync job for repository {backend_id} failed: {error}")]
    JobFailed { backend_id: String, error: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::TaskTimeout,
            Self::Failed { .. } | Self::JobFailed { .. } => ErrorCode::TaskFailed,
            Self::NotFound { .. } => ErrorCode::TaskNotFound,
            Self::Transport(err) => err.code(),
        }
    }
}
