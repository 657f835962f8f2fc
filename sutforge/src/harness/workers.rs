//! Binding worker processes to SUT hosts.
//!
//! Each worker is pinned to one host from `server.hostnames` for the whole
//! session. After pinning, `server.hostname` reads the chosen host and
//! transports built from the settings talk to it.

use super::HarnessError;
use crate::transport::TransportSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use sutforge_common::Settings;
use tracing::info;

/// How a worker picks its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HostStrategy {
    /// Every worker shares the first host.
    RunOnOne,
    /// Worker N takes host N.
    Positional,
    /// A random host per worker.
    Balance,
    /// A fresh host per worker from a [`HostProvisioner`].
    OnDemand,
}

impl HostStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunOnOne => "run-on-one",
            Self::Positional => "positional",
            Self::Balance => "balance",
            Self::OnDemand => "on-demand",
        }
    }

    /// `server.xdist_behavior`, defaulting to run-on-one.
    pub fn from_settings(settings: &Settings) -> Result<Self, HarnessError> {
        match settings.get_opt_string("server.xdist_behavior")? {
            Some(raw) => raw.parse(),
            None => Ok(Self::RunOnOne),
        }
    }
}

impl FromStr for HostStrategy {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "run-on-one" => Ok(Self::RunOnOne),
            "positional" => Ok(Self::Positional),
            "balance" => Ok(Self::Balance),
            "on-demand" => Ok(Self::OnDemand),
            _ => Err(HarnessError::InvalidStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for HostStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `master` when running without workers, `gw<N>` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    Master,
    Gateway(usize),
}

impl WorkerId {
    /// Position in the host list.
    pub fn index(&self) -> usize {
        match self {
            Self::Master => 0,
            Self::Gateway(n) => *n,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master)
    }
}

impl FromStr for WorkerId {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw == "master" {
            return Ok(Self::Master);
        }
        raw.strip_prefix("gw")
            .and_then(|n| n.parse().ok())
            .map(Self::Gateway)
            .ok_or_else(|| HarnessError::InvalidWorker(s.to_string()))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Gateway(n) => write!(f, "gw{n}"),
        }
    }
}

/// Hands out fresh SUT hosts for the on-demand strategy.
#[async_trait]
pub trait HostProvisioner: Send + Sync {
    /// Provision a host for `worker` and return its hostname.
    async fn checkout(&self, worker: WorkerId) -> Result<String, HarnessError>;

    /// Return a host at teardown.
    async fn checkin(&self, hostname: &str) -> Result<(), HarnessError>;
}

/// The host a worker ended up with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerBinding {
    #[serde(serialize_with = "serialize_display")]
    pub worker: WorkerId,
    pub strategy: HostStrategy,
    pub hostname: String,
    /// Whether the host came from a provisioner and must be checked in.
    pub provisioned: bool,
}

fn serialize_display<S: serde::Serializer>(worker: &WorkerId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(worker)
}

/// Pick a host from `hostnames` for `worker`. `None` means the strategy
/// does not pick from the list (on-demand) or the list is empty.
pub fn select_host(
    strategy: HostStrategy,
    worker: WorkerId,
    hostnames: &[String],
) -> Result<Option<String>, HarnessError> {
    if hostnames.is_empty() || strategy == HostStrategy::OnDemand {
        return Ok(None);
    }
    let host = match strategy {
        HostStrategy::RunOnOne => &hostnames[0],
        HostStrategy::Positional => hostnames.get(worker.index()).ok_or_else(|| HarnessError::NoHost {
            worker: worker.to_string(),
            available: hostnames.len(),
        })?,
        HostStrategy::Balance => &hostnames[fastrand::usize(..hostnames.len())],
        HostStrategy::OnDemand => return Ok(None),
    };
    Ok(Some(host.clone()))
}

/// Choose a host for `worker` and pin `server.hostname` to it.
///
/// Without configured hostnames (and outside on-demand) the worker keeps
/// whatever `server.hostname` already resolves to.
pub async fn align_worker(
    settings: &Settings,
    worker: WorkerId,
    strategy: HostStrategy,
    provisioner: Option<&dyn HostProvisioner>,
) -> Result<WorkerBinding, HarnessError> {
    let (hostname, provisioned) = if strategy == HostStrategy::OnDemand {
        let provisioner = provisioner.ok_or_else(|| HarnessError::Provisioning {
            worker: worker.to_string(),
            message: "on-demand strategy needs a host provisioner".into(),
        })?;
        (provisioner.checkout(worker).await?, true)
    } else {
        let hostnames = settings.get_list_or_empty("server.hostnames")?;
        match select_host(strategy, worker, &hostnames)? {
            Some(host) => (host, false),
            None => (settings.get_string("server.hostname")?, false),
        }
    };

    settings.pin_hostname(hostname.clone());
    info!(%worker, %strategy, hostname = %hostname, "Worker aligned");
    Ok(WorkerBinding {
        worker,
        strategy,
        hostname,
        provisioned,
    })
}

/// A worker bound to its host with transports pointed at it.
pub struct AlignedWorker {
    pub binding: WorkerBinding,
    pub transports: TransportSet,
}

/// [`align_worker`], then build API, CLI and SSH transports for the
/// pinned host.
pub async fn align_and_connect(
    settings: Arc<Settings>,
    worker: WorkerId,
    strategy: HostStrategy,
    provisioner: Option<&dyn HostProvisioner>,
) -> Result<AlignedWorker, HarnessError> {
    let binding = align_worker(&settings, worker, strategy, provisioner).await?;
    let transports = TransportSet::from_settings(settings)?;
    Ok(AlignedWorker { binding, transports })
}

/// Teardown: check provisioned hosts back in.
pub async fn release_worker(
    binding: &WorkerBinding,
    provisioner: Option<&dyn HostProvisioner>,
) -> Result<(), HarnessError> {
    if !binding.provisioned {
        return Ok(());
    }
    let Some(provisioner) = provisioner else {
        return Err(HarnessError::Provisioning {
            worker: binding.worker.to_string(),
            message: format!("no provisioner to check {} back in", binding.hostname),
        });
    };
    provisioner.checkin(&binding.hostname).await?;
    info!(worker = %binding.worker, hostname = %binding.hostname, "Host checked in");
    Ok(())
}
