//! Scoped SUT mutations.
//!
//! Each guard captures the state it is about to change, applies the change,
//! and puts the captured state back in [`Restore::restore`]. [`scoped`]
//! runs a body between the two and restores whether the body returned
//! `Ok`, returned `Err` or panicked.

use crate::client::{EntityClient, options};
use crate::transport::ssh::RemoteExecutor;
use crate::transport::{Options, TransportError};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use sutforge_common::casts::cast_bool;
use sutforge_common::{ConfigError, ErrorCode, Settings};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hammer's per-user credentials file on the SUT.
pub const HAMMER_CREDENTIALS_PATH: &str = "/root/.hammer/cli.modules.d/foreman.yml";

#[derive(Debug, Error)]
pub enum ScopedError {
    #[error("Invalid setting override '{0}': expected name=value")]
    InvalidOverride(String),

    #[error("Setting '{0}' does not exist on the SUT")]
    SettingMissing(String),

    #[error("Could not restore {what}: {source}")]
    RestoreFailed {
        what: String,
        #[source]
        source: TransportError,
    },

    #[error("Admin password reset on {host} failed with exit status {status}: {stderr}")]
    ResetFailed {
        host: String,
        status: i32,
        stderr: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ScopedError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOverride(_) | Self::SettingMissing(_) => ErrorCode::ScopedSettingMissing,
            Self::RestoreFailed { .. } | Self::ResetFailed { .. } => ErrorCode::ScopedRestoreFailed,
            Self::Transport(err) => err.code(),
            Self::Config(err) => err.code(),
        }
    }
}

/// Something that can undo the mutation it made.
#[async_trait]
pub trait Restore: Send {
    /// What is being restored, for logs.
    fn describe(&self) -> String;

    async fn restore(&mut self) -> Result<(), ScopedError>;
}

/// Run `body` and restore `guard` afterwards on every exit path.
///
/// A body error wins over a restore error; the restore error is logged.
/// A panic in the body is re-raised once the guard is restored.
pub async fn scoped<G, F, Fut, T, E>(mut guard: G, body: F) -> Result<T, E>
where
    G: Restore,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopedError>,
{
    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
    let restored = guard.restore().await;

    match (outcome, restored) {
        (Err(panic), Ok(())) => resume_unwind(panic),
        (Err(panic), Err(err)) => {
            warn!(guard = %guard.describe(), error = %err, "Restore failed after panic");
            resume_unwind(panic)
        }
        (Ok(Ok(value)), Ok(())) => Ok(value),
        (Ok(Ok(_)), Err(err)) => Err(err.into()),
        (Ok(Err(err)), Ok(())) => Err(err),
        (Ok(Err(err)), Err(restore_err)) => {
            warn!(guard = %guard.describe(), error = %restore_err, "Restore failed after body error");
            Err(err)
        }
    }
}

// ============================================================================
// Setting override
// ============================================================================

/// Split `"name=value"`. The value may itself contain `=`.
pub fn parse_override(assignment: &str) -> Result<(&str, &str), ScopedError> {
    match assignment.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(ScopedError::InvalidOverride(assignment.to_string())),
    }
}

/// A SUT setting changed for the length of a scope.
pub struct SettingOverride {
    client: EntityClient,
    id: u64,
    name: String,
    original: Value,
    restored: bool,
}

impl SettingOverride {
    /// Capture the current value of the setting named in `assignment` and apply
    /// the new one.
    pub async fn apply(client: &EntityClient, assignment: &str) -> Result<Self, ScopedError> {
        let (name, value) = parse_override(assignment)?;
        let setting = client
            .find("Setting", &format!("name = \"{name}\""), Options::new())
            .await?
            .ok_or_else(|| ScopedError::SettingMissing(name.to_string()))?;
        let id = setting
            .id()
            .ok_or_else(|| ScopedError::SettingMissing(name.to_string()))?;
        let original = setting.get("value").cloned().unwrap_or(Value::Null);

        client
            .update("Setting", id, options([("value", value)]))
            .await?;
        info!(setting = name, value, "Setting overridden");

        Ok(Self {
            client: client.clone(),
            id,
            name: name.to_string(),
            original,
            restored: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original(&self) -> &Value {
        &self.original
    }
}

#[async_trait]
impl Restore for SettingOverride {
    fn describe(&self) -> String {
        format!("setting {}", self.name)
    }

    async fn restore(&mut self) -> Result<(), ScopedError> {
        if self.restored {
            return Ok(());
        }
        self.client
            .update("Setting", self.id, options([("value", self.original.clone())]))
            .await
            .map_err(|source| ScopedError::RestoreFailed {
                what: self.describe(),
                source,
            })?;
        self.restored = true;
        info!(setting = %self.name, "Setting restored");
        Ok(())
    }
}

impl Drop for SettingOverride {
    fn drop(&mut self) {
        if !self.restored {
            warn!(setting = %self.name, "Setting override dropped without restore");
        }
    }
}

/// Run `body` with a SUT setting overridden by `assignment` (`"name=value"`).
pub async fn with_setting<F, Fut, T, E>(client: &EntityClient, assignment: &str, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopedError>,
{
    let guard = SettingOverride::apply(client, assignment).await?;
    scoped(guard, body).await
}

// ============================================================================
// Template unlock
// ============================================================================

fn is_locked(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(locked)) => *locked,
        Some(Value::String(raw)) => cast_bool(raw).unwrap_or(false),
        _ => false,
    }
}

/// A locked template opened for editing. Templates that were already
/// unlocked are left alone.
pub struct TemplateUnlock {
    client: EntityClient,
    class: &'static str,
    id: u64,
    relock: bool,
}

impl TemplateUnlock {
    pub async fn apply(client: &EntityClient, template_id: u64) -> Result<Self, ScopedError> {
        Self::apply_to(client, "ProvisioningTemplate", template_id).await
    }

    /// Same as [`TemplateUnlock::apply`] for any lockable class, such as
    /// `PartitionTable`.
    pub async fn apply_to(client: &EntityClient, class: &'static str, id: u64) -> Result<Self, ScopedError> {
        let template = client.read(class, id).await?;
        let relock = is_locked(template.get("locked"));
        if relock {
            client
                .update(class, id, options([("locked", false)]))
                .await?;
            debug!(class, id, "Template unlocked");
        }
        Ok(Self {
            client: client.clone(),
            class,
            id,
            relock,
        })
    }

    /// Whether the template was locked on entry.
    pub fn was_locked(&self) -> bool {
        self.relock
    }
}

#[async_trait]
impl Restore for TemplateUnlock {
    fn describe(&self) -> String {
        format!("{} {} lock", self.class, self.id)
    }

    async fn restore(&mut self) -> Result<(), ScopedError> {
        if !self.relock {
            return Ok(());
        }
        self.client
            .update(self.class, self.id, options([("locked", true)]))
            .await
            .map_err(|source| ScopedError::RestoreFailed {
                what: self.describe(),
                source,
            })?;
        self.relock = false;
        debug!(class = self.class, id = self.id, "Template locked again");
        Ok(())
    }
}

impl Drop for TemplateUnlock {
    fn drop(&mut self) {
        if self.relock {
            warn!(class = self.class, id = self.id, "Template left unlocked");
        }
    }
}

pub async fn with_template_unlocked<F, Fut, T, E>(
    client: &EntityClient,
    template_id: u64,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopedError>,
{
    let guard = TemplateUnlock::apply(client, template_id).await?;
    scoped(guard, body).await
}

// ============================================================================
// Admin credentials
// ============================================================================

fn is_auth_failure(err: &TransportError) -> bool {
    match err {
        TransportError::Http { status, .. } => *status == 401,
        TransportError::Cli { stderr, .. } => {
            stderr.contains("Unable to authenticate") || stderr.contains("Invalid username or password")
        }
        _ => false,
    }
}

/// Hammer's credentials file for `login`.
pub fn hammer_credentials(login: &str, password: &str) -> String {
    format!(
        ":foreman:\n  :username: '{}'\n  :password: '{}'\n",
        login.replace('\'', "''"),
        password.replace('\'', "''")
    )
}

/// Puts the configured admin password back when a test changed it, and
/// rewrites hammer's cached credentials to match.
pub struct AdminCredentialGuard {
    client: EntityClient,
    executor: Arc<dyn RemoteExecutor>,
    login: String,
    password: String,
    config_path: String,
}

impl AdminCredentialGuard {
    pub fn new(
        client: &EntityClient,
        executor: Arc<dyn RemoteExecutor>,
        settings: &Settings,
    ) -> Result<Self, ScopedError> {
        let server = settings.server()?;
        Ok(Self {
            client: client.clone(),
            executor,
            login: server.admin_username,
            password: server.admin_password,
            config_path: HAMMER_CREDENTIALS_PATH.to_string(),
        })
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Whether the configured admin credentials still authenticate.
    pub async fn credentials_valid(&self) -> Result<bool, ScopedError> {
        let as_user = self.client.with_user(&self.login, &self.password);
        let search = options([("search", format!("login = \"{}\"", self.login))]);
        match as_user.search("User", search).await {
            Ok(_) => Ok(true),
            Err(err) if is_auth_failure(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn reset_password(&self) -> Result<(), ScopedError> {
        let command = format!(
            "FOREMAN_ADMIN_PASSWORD={} foreman-rake permissions:reset username={} password=\"$FOREMAN_ADMIN_PASSWORD\"",
            shell_escape::escape(self.password.as_str().into()),
            shell_escape::escape(self.login.as_str().into()),
        );
        let output = self
            .executor
            .run(&command, None)
            .await
            .map_err(TransportError::from)?;
        if !output.success() {
            return Err(ScopedError::ResetFailed {
                host: self.executor.host().to_string(),
                status: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Restore for AdminCredentialGuard {
    fn describe(&self) -> String {
        format!("credentials of {}", self.login)
    }

    async fn restore(&mut self) -> Result<(), ScopedError> {
        if self.credentials_valid().await? {
            debug!(login = %self.login, "Admin credentials unchanged");
            return Ok(());
        }
        warn!(login = %self.login, host = self.executor.host(), "Admin password changed, resetting");
        self.reset_password().await?;
        self.executor
            .upload(&self.config_path, hammer_credentials(&self.login, &self.password).as_bytes())
            .await
            .map_err(|err| ScopedError::RestoreFailed {
                what: self.config_path.clone(),
                source: err.into(),
            })?;
        info!(login = %self.login, path = %self.config_path, "Admin credentials restored");
        Ok(())
    }
}

pub async fn with_admin_credentials<F, Fut, T, E>(guard: AdminCredentialGuard, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopedError>,
{
    scoped(guard, body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::RetryPolicy;
    use crate::transport::Transport;
    use crate::transport::mock::{MockExecutor, MockSut};
    use serde_json::json;

    fn client(sut: &Arc<MockSut>) -> EntityClient {
        let transport: Arc<dyn Transport> = sut.clone();
        EntityClient::new(transport).with_read_retry(RetryPolicy::none())
    }

    #[derive(Debug, Error)]
    enum BodyError {
        #[error("body failed")]
        Body,
        #[error(transparent)]
        Scoped(#[from] ScopedError),
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override("a=b").unwrap(), ("a", "b"));
        assert_eq!(parse_override(" url = x=y").unwrap(), ("url", " x=y"));
        assert!(matches!(parse_override("novalue"), Err(ScopedError::InvalidOverride(_))));
        assert!(matches!(parse_override("=x"), Err(ScopedError::InvalidOverride(_))));
    }

    #[tokio::test]
    async fn test_setting_is_changed_inside_and_restored_after() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let inner = sut.clone();
        let seen = with_setting(&client, "foreman_url=http://example.test", || async move {
            Ok::<_, BodyError>(inner.setting_value("foreman_url"))
        })
        .await
        .unwrap();
        assert_eq!(seen, Some(json!("http://example.test")));
        assert_eq!(sut.setting_value("foreman_url"), Some(json!("https://sut.example.test")));
    }

    #[tokio::test]
    async fn test_setting_restored_when_body_fails() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let err = with_setting(&client, "entries_per_page=5", || async { Err::<(), _>(BodyError::Body) })
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Body));
        assert_eq!(sut.setting_value("entries_per_page"), Some(json!(20)));
    }

    #[tokio::test]
    async fn test_setting_restored_when_body_panics() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let task = tokio::spawn(async move {
            with_setting(&client, "outofsync_interval=1", || async {
                if true {
                    panic!("boom");
                }
                Ok::<(), BodyError>(())
            })
            .await
        });
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(sut.setting_value("outofsync_interval"), Some(json!(30)));
    }

    #[tokio::test]
    async fn test_missing_setting_names_it() {
        let sut = Arc::new(MockSut::new());
        let err = SettingOverride::apply(&client(&sut), "no_such_setting=1")
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Setting 'no_such_setting' does not exist on the SUT");
        assert_eq!(err.code(), ErrorCode::ScopedSettingMissing);
    }

    #[tokio::test]
    async fn test_body_error_wins_over_restore_error() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let guard = SettingOverride::apply(&client, "foreman_url=http://example.test")
            .await
            .unwrap();
        sut.fail_next(
            "Setting",
            Some(crate::transport::Action::Update),
            TransportError::Parse {
                context: "setting".into(),
                reason: "gone".into(),
            },
        );
        let err = scoped(guard, || async { Err::<(), _>(BodyError::Body) })
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Body));
    }

    #[tokio::test]
    async fn test_restore_error_surfaces_after_success() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let guard = SettingOverride::apply(&client, "foreman_url=http://example.test")
            .await
            .unwrap();
        sut.fail_next(
            "Setting",
            Some(crate::transport::Action::Update),
            TransportError::Parse {
                context: "setting".into(),
                reason: "gone".into(),
            },
        );
        let err = scoped(guard, || async { Ok::<_, BodyError>(()) }).await.unwrap_err();
        match err {
            BodyError::Scoped(err) => assert_eq!(err.code(), ErrorCode::ScopedRestoreFailed),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_locked_template_is_relocked() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let template = sut.records("ProvisioningTemplate")[0].id().unwrap();
        let inner = sut.clone();
        let locked_inside = with_template_unlocked(&client, template, || async move {
            Ok::<_, BodyError>(inner.record("ProvisioningTemplate", template).unwrap().get("locked").cloned())
        })
        .await
        .unwrap();
        assert_eq!(locked_inside, Some(json!(false)));
        assert_eq!(
            sut.record("ProvisioningTemplate", template).unwrap().get("locked"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn test_unlocked_template_is_left_alone() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let template = sut.seed("ProvisioningTemplate", json!({"name": "open", "locked": false}));
        let guard = TemplateUnlock::apply(&client, template).await.unwrap();
        assert!(!guard.was_locked());
        scoped(guard, || async { Err::<(), _>(BodyError::Body) }).await.unwrap_err();
        assert!(sut.requests_for("ProvisioningTemplate", &crate::transport::Action::Update).is_empty());
    }

    fn settings() -> Settings {
        Settings::from_yaml_str(
            "server:\n  hostname: sut.example.test\n  admin_username: admin\n  admin_password: changeme\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_admin_password_is_a_noop() {
        let sut = Arc::new(MockSut::new());
        let executor = Arc::new(MockExecutor::new("sut.example.test"));
        let guard = AdminCredentialGuard::new(&client(&sut), executor.clone(), &settings()).unwrap();
        with_admin_credentials(guard, || async { Ok::<_, BodyError>(()) })
            .await
            .unwrap();
        assert!(executor.commands().is_empty());
        assert!(executor.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_changed_admin_password_is_reset() {
        let sut = Arc::new(MockSut::new());
        let client = client(&sut);
        let executor = Arc::new(MockExecutor::new("sut.example.test"));
        executor.push_output(0, "Reset to user: admin, password: changeme", "");
        let guard = AdminCredentialGuard::new(&client, executor.clone(), &settings()).unwrap();

        let admin = sut.records("User")[0].id().unwrap();
        let body_client = client.clone();
        with_admin_credentials(guard, || async move {
            body_client
                .update("User", admin, options([("password", "n3w-secret")]))
                .await
                .map_err(ScopedError::from)?;
            Ok::<_, BodyError>(())
        })
        .await
        .unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("foreman-rake permissions:reset username=admin"));
        let written = executor.file(HAMMER_CREDENTIALS_PATH).unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), hammer_credentials("admin", "changeme"));
    }

    #[tokio::test]
    async fn test_failed_reset_is_reported() {
        let sut = Arc::new(MockSut::new());
        let executor = Arc::new(MockExecutor::new("sut.example.test"));
        executor.push_output(1, "", "rake aborted!");
        let admin = sut.records("User")[0].id().unwrap();
        client(&sut)
            .update("User", admin, options([("password", "other")]))
            .await
            .unwrap();

        let mut guard = AdminCredentialGuard::new(&client(&sut), executor, &settings()).unwrap();
        let err = guard.restore().await.unwrap_err();
        assert!(matches!(err, ScopedError::ResetFailed { status: 1, .. }));
        assert_eq!(err.code(), ErrorCode::ScopedRestoreFailed);
    }

    #[test]
    fn test_hammer_credentials_quotes() {
        assert_eq!(
            hammer_credentials("admin", "it's"),
            ":foreman:\n  :username: 'admin'\n  :password: 'it''s'\n"
        );
    }
}
