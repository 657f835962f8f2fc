//! Entity-level calls over any transport.

use crate::tasks::retry::{RetryPolicy, retry};
use crate::transport::{Action, Attachment, Options, Request, Transport, TransportError, TransportResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use sutforge_common::{Credentials, EntityHandle};

/// Read retries: three tries, five seconds apart.
pub const DEFAULT_READ_RETRY: (u32, Duration) = (3, Duration::from_secs(5));

/// CRUD and domain actions against one transport, optionally scoped to a
/// user. Reads and searches are retried on transient failures.
#[derive(Clone)]
pub struct EntityClient {
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
    read_retry: RetryPolicy,
}

impl EntityClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            credentials: None,
            read_retry: RetryPolicy::fixed(DEFAULT_READ_RETRY.0, DEFAULT_READ_RETRY.1),
        }
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// A view that runs every call as `login`.
    pub fn with_user(&self, login: &str, password: &str) -> Self {
        let mut view = self.clone();
        view.credentials = Some(Credentials::new(login, password));
        view
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send a request, retrying idempotent ones.
    pub async fn call(&self, mut request: Request) -> Result<TransportResult, TransportError> {
        if request.credentials.is_none() {
            request.credentials = self.credentials.clone();
        }
        if !request.action.is_idempotent() {
            return self.transport.call(request).await;
        }
        let label = format!("{} {}", request.class, request.action);
        retry(&label, &self.read_retry, || {
            let transport = self.transport.clone();
            let request = request.clone();
            async move { transport.call(request).await }
        })
        .await
    }

    pub async fn create(&self, class: &str, options: Options) -> Result<EntityHandle, TransportError> {
        let result = self
            .call(Request::new(class, Action::Create).with_options(options))
            .await?;
        expect_handle(class, "create", result)
    }

    pub async fn read(&self, class: &str, id: impl Into<Value>) -> Result<EntityHandle, TransportError> {
        let result = self
            .call(Request::new(class, Action::Info).option("id", id))
            .await?;
        expect_handle(class, "info", result)
    }

    /// Read with extra scoping options (`organization-id` and the like).
    pub async fn read_with(&self, class: &str, options: Options) -> Result<EntityHandle, TransportError> {
        let result = self
            .call(Request::new(class, Action::Info).with_options(options))
            .await?;
        expect_handle(class, "info", result)
    }

    pub async fn search(&self, class: &str, options: Options) -> Result<Vec<EntityHandle>, TransportError> {
        let result = self
            .call(Request::new(class, Action::List).with_options(options))
            .await?;
        Ok(result.into_handles())
    }

    /// First record matching a scoped-search string.
    pub async fn find(
        &self,
        class: &str,
        search: &str,
        mut scope: Options,
    ) -> Result<Option<EntityHandle>, TransportError> {
        scope.insert("search".into(), Value::String(search.to_string()));
        Ok(self.search(class, scope).await?.into_iter().next())
    }

    pub async fn update(
        &self,
        class: &str,
        id: impl Into<Value>,
        mut options: Options,
    ) -> Result<EntityHandle, TransportError> {
        options.insert("id".into(), id.into());
        let result = self
            .call(Request::new(class, Action::Update).with_options(options))
            .await?;
        // Some update commands print only a status message.
        Ok(result.into_handle().unwrap_or_default())
    }

    pub async fn delete(&self, class: &str, id: impl Into<Value>) -> Result<(), TransportError> {
        self.call(Request::new(class, Action::Delete).option("id", id))
            .await?;
        Ok(())
    }

    /// Run a domain action and return its raw output.
    pub async fn action(&self, class: &str, action: &str, options: Options) -> Result<Value, TransportError> {
        let result = self
            .call(Request::new(class, Action::parse(action)).with_options(options))
            .await?;
        Ok(result.output)
    }

    pub async fn upload(
        &self,
        class: &str,
        action: &str,
        options: Options,
        attachment: Attachment,
    ) -> Result<Value, TransportError> {
        let result = self
            .call(
                Request::new(class, Action::parse(action))
                    .with_options(options)
                    .with_attachment(attachment),
            )
            .await?;
        Ok(result.output)
    }
}

fn expect_handle(class: &str, action: &str, result: TransportResult) -> Result<EntityHandle, TransportError> {
    let output = result.output.clone();
    result.into_handle().ok_or_else(|| TransportError::Parse {
        context: format!("{class} {action}"),
        reason: format!("expected a single record, got {output}"),
    })
}

/// Build an option map from `(key, value)` pairs.
pub fn options<K, V, I>(pairs: I) -> Options
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
