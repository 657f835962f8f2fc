//! Manifest cloning and serialised upload.
//!
//! The SUT rejects a second manifest import into an organisation while
//! one is running, so uploads for the same organisation are serialised
//! across worker processes by a PID lock file in a shared directory.

use super::{SetupError, SetupOrchestrator};
use crate::client::options;
use crate::transport::Attachment;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sutforge_common::{Manifest, Settings, TaskHandle};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Build a manifest with a unique filename from `fake_manifest.path`, or
/// download it from `fake_manifest.url.default`.
pub async fn clone_manifest(settings: &Settings) -> Result<Manifest, SetupError> {
    let content = if let Some(path) = settings.get_opt_string("fake_manifest.path")? {
        fs::read(&path).map_err(|e| SetupError::Manifest(format!("cannot read {path}: {e}")))?
    } else if let Some(url) = settings.get_opt_string("fake_manifest.url.default")? {
        download(&url).await?
    } else {
        return Err(SetupError::Manifest(
            "neither fake_manifest.path nor fake_manifest.url.default is set".into(),
        ));
    };
    if content.is_empty() {
        return Err(SetupError::Manifest("base manifest is empty".into()));
    }
    let filename = format!("manifest-{}.zip", uuid::Uuid::new_v4().simple());
    debug!(filename = %filename, bytes = content.len(), "Manifest cloned");
    Ok(Manifest::new(filename, content))
}

async fn download(url: &str) -> Result<Vec<u8>, SetupError> {
    let fetch = async {
        let response = reqwest::get(url).await?.error_for_status()?;
        response.bytes().await
    };
    fetch
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| SetupError::Manifest(format!("cannot download {url}: {e}")))
}

/// Cross-process lock for one organisation's manifest imports.
///
/// The lock file holds the owner's PID and is linked into place fully
/// written, so a reader never sees it empty. A file whose PID no longer
/// runs is stale: it is renamed aside, re-read, and only deleted if it
/// still names the dead owner. Dropping the lock removes the file.
#[derive(Debug)]
pub struct ManifestLock {
    path: PathBuf,
}

impl ManifestLock {
    pub fn path_for(dir: &Path, organization_id: u64) -> PathBuf {
        dir.join(format!("manifest-org-{organization_id}.lock"))
    }

    /// Try once. `Ok(None)` means another owner holds the lock, or a
    /// stale one was just cleared and the caller should try again.
    pub fn try_acquire(dir: &Path, organization_id: u64) -> Result<Option<Self>, SetupError> {
        let path = Self::path_for(dir, organization_id);
        fs::create_dir_all(dir)
            .map_err(|e| SetupError::Manifest(format!("cannot create lock dir {}: {e}", dir.display())))?;

        let pid = std::process::id();
        let temp_path = sibling(&path, &format!("{pid}.{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, pid.to_string()).map_err(|e| {
            SetupError::Manifest(format!("cannot write lock file {}: {e}", temp_path.display()))
        })?;
        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(Some(Self { path })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Unreadable or empty files belong to someone mid-write.
                if let Some(owner) = read_pid(&path)
                    && !is_process_running(owner)
                {
                    clear_stale(&path, owner);
                }
                Ok(None)
            }
            Err(e) => Err(SetupError::Manifest(format!(
                "cannot create lock file {}: {e}",
                path.display()
            ))),
        }
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire(dir: &Path, organization_id: u64, timeout: Duration) -> Result<Self, SetupError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(dir, organization_id)? {
                debug!(organization_id, "Manifest lock acquired");
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(SetupError::ManifestLockTimeout {
                    path: Self::path_for(dir, organization_id),
                    timeout,
                });
            }
            sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove the lock at `path` if it still belongs to `dead_owner`.
///
/// The rename makes this worker the only one holding that file. If it
/// turns out to be a fresh lock taken after `dead_owner` was read, it is
/// linked back in place.
fn clear_stale(path: &Path, dead_owner: u32) {
    let aside = sibling(path, &format!("{}.stale", uuid::Uuid::new_v4().simple()));
    if fs::rename(path, &aside).is_err() {
        return;
    }
    match read_pid(&aside) {
        Some(owner) if owner == dead_owner || !is_process_running(owner) => {
            warn!(path = %path.display(), pid = owner, "Removing stale manifest lock");
        }
        owner => {
            debug!(path = %path.display(), ?owner, "Lock changed hands, putting it back");
            if let Err(e) = fs::hard_link(&aside, path) {
                warn!(path = %path.display(), error = %e, "Could not restore manifest lock");
            }
        }
    }
    let _ = fs::remove_file(&aside);
}

fn read_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Check if a process is still running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ps")
            .args(["-p", &pid.to_string()])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        pid == std::process::id()
    }
}

impl SetupOrchestrator {
    /// Upload a manifest into an organisation while holding its lock.
    pub async fn upload_manifest(&self, organization_id: u64, manifest: Manifest) -> Result<(), SetupError> {
        let _lock =
            ManifestLock::acquire(&self.lock_dir, organization_id, self.timeouts.manifest_lock).await?;
        let filename = manifest.filename.clone();
        let output = self
            .client
            .upload(
                "Subscription",
                "upload",
                options([("organization-id", organization_id)]),
                Attachment::from(manifest),
            )
            .await?;
        // The API answers with the import task; hammer waits on its own.
        if let Some(task) = TaskHandle::from_value(&output).filter(|t| !t.label.is_empty()) {
            self.poller
                .wait_for_task(&task.id, self.timeouts.manifest_lock)
                .await?;
        }
        info!(organization_id, filename = %filename, "Manifest uploaded");
        Ok(())
    }

    /// Clone the configured manifest and upload it.
    pub async fn upload_cloned_manifest(&self, organization_id: u64) -> Result<(), SetupError> {
        let manifest = clone_manifest(&self.settings).await?;
        self.upload_manifest(organization_id, manifest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock = ManifestLock::try_acquire(dir.path(), 1).unwrap().unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());

        // Same PID counts as a live owner.
        assert!(ManifestLock::try_acquire(dir.path(), 1).unwrap().is_none());
        // Other organisations are independent.
        assert!(ManifestLock::try_acquire(dir.path(), 2).unwrap().is_some());

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
        assert!(ManifestLock::try_acquire(dir.path(), 1).unwrap().is_some());
    }

    #[test]
    fn test_stale_lock_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = ManifestLock::path_for(dir.path(), 9);
        fs::write(&path, "999999999").unwrap();
        assert!(ManifestLock::try_acquire(dir.path(), 9).unwrap().is_none());
        assert!(!path.exists());
        assert!(ManifestLock::try_acquire(dir.path(), 9).unwrap().is_some());
    }

    #[test]
    fn test_lock_being_written_is_not_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = ManifestLock::path_for(dir.path(), 4);
        // Another worker has created the file but not written its PID yet.
        OpenOptions::new().write(true).create_new(true).open(&path).unwrap();

        assert!(ManifestLock::try_acquire(dir.path(), 4).unwrap().is_none());
        assert!(ManifestLock::try_acquire(dir.path(), 4).unwrap().is_none());
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        // No temp or stale files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_stale_cleanup_restores_a_lock_that_changed_hands() {
        let dir = TempDir::new().unwrap();
        let lock = ManifestLock::try_acquire(dir.path(), 5).unwrap().unwrap();

        // A worker that read a dead PID before this lock was taken.
        clear_stale(lock.path(), 999_999_999);

        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
        assert!(ManifestLock::try_acquire(dir.path(), 5).unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_drop_leaves_someone_elses_lock_alone() {
        let dir = TempDir::new().unwrap();
        let lock = ManifestLock::try_acquire(dir.path(), 6).unwrap().unwrap();
        let path = lock.path().to_path_buf();
        fs::write(&path, "999999999").unwrap();
        drop(lock);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let _held = ManifestLock::try_acquire(dir.path(), 3).unwrap().unwrap();
        let err = ManifestLock::acquire(dir.path(), 3, Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::ManifestLockTimeout { .. }));
    }

    #[tokio::test]
    async fn test_clone_gives_unique_names() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.zip");
        fs::write(&base, b"PK\x03\x04manifest").unwrap();
        let settings = Settings::from_yaml_str(&format!(
            "fake_manifest:\n  path: {}\n",
            base.display()
        ))
        .unwrap();
        let a = clone_manifest(&settings).await.unwrap();
        let b = clone_manifest(&settings).await.unwrap();
        assert_ne!(a.filename, b.filename);
        assert_eq!(a.content, b"PK\x03\x04manifest");
    }

    #[tokio::test]
    async fn test_clone_without_source_fails() {
        let settings = Settings::from_yaml_str("server:\n  hostname: h\n").unwrap();
        let err = clone_manifest(&settings).await.unwrap_err();
        assert!(matches!(err, SetupError::Manifest(_)));
    }
}
