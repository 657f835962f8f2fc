//! Hooks a test runner calls around the suite.
//!
//! - [`markers`]: `skip_if_not_set` section checks
//! - [`workers`]: binding each worker process to one SUT host
//! - [`header`]: the one-line session header
//! - [`report`]: global properties for JUnit-style reports

pub mod header;
pub mod markers;
pub mod report;
pub mod workers;

use crate::transport::TransportError;
use sutforge_common::{ConfigError, ErrorCode};
use thiserror::Error;

pub use header::test_header;
pub use markers::{MarkerOutcome, require_sections, skip_if_not_set};
pub use report::{START_TIME_FORMAT, START_TIME_PROPERTY, report_properties};
pub use workers::{
    AlignedWorker, HostProvisioner, HostStrategy, WorkerBinding, WorkerId, align_and_connect,
    align_worker, release_worker, select_host,
};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Skipped: {0}")]
    Skip(String),

    #[error("Unknown section '{section}'. Valid sections: {}", .valid.join(", "))]
    UnknownSection { section: String, valid: Vec<String> },

    #[error("Invalid worker id '{0}': expected 'master' or 'gw<N>'")]
    InvalidWorker(String),

    #[error("Unknown host strategy '{0}'")]
    InvalidStrategy(String),

    #[error("No host for worker {worker}: {available} configured")]
    NoHost { worker: String, available: usize },

    #[error("Host provisioning failed for {worker}: {message}")]
    Provisioning { worker: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HarnessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Skip(_) => ErrorCode::SkipRequested,
            Self::UnknownSection { .. } => ErrorCode::UnknownSection,
            Self::InvalidWorker(_)
            | Self::InvalidStrategy(_)
            | Self::NoHost { .. }
            | Self::Provisioning { .. } => ErrorCode::WorkerAlignmentFailed,
            Self::Config(err) => err.code(),
            Self::Transport(err) => err.code(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}
