//! REST API transport.

use super::catalog::{self, class_by_name};
use super::{Action, Options, Request, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use reqwest::{Client, Method, Url, multipart};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use sutforge_common::types::normalize_keys;
use sutforge_common::util::display_value;
use sutforge_common::{Credentials, Settings};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Actions sent with `PUT`; every other custom action is a `POST`.
const PUT_ACTIONS: &[&str] = &[
    "enable",
    "disable",
    "add-subscription",
    "remove-subscription",
    "refresh",
    "add-repository",
    "content-override",
];

/// Hammer action names whose REST path segment differs.
const PATH_ALIASES: &[(&str, &str)] = &[
    ("add-subscription", "add_subscriptions"),
    ("remove-subscription", "remove_subscriptions"),
    ("synchronize", "sync"),
];

#[derive(Clone)]
pub struct ApiTransport {
    client: Client,
    base_url: Url,
    credentials: Credentials,
}

impl ApiTransport {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let server = settings.server()?;
        let base_url = server.base_url();
        let base_url = Url::parse(&base_url).map_err(|e| TransportError::Parse {
            context: base_url.clone(),
            reason: e.to_string(),
        })?;
        Self::with_base_url(
            base_url,
            Credentials::new(server.admin_username, server.admin_password),
        )
    }

    pub fn with_base_url(base_url: Url, credentials: Credentials) -> Result<Self, TransportError> {
        // The SUT serves a self-signed certificate.
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|source| TransportError::Request {
                method: "CONNECT".into(),
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// A view of this transport that authenticates as `login`.
    pub fn with_user(&self, login: &str, password: &str) -> Self {
        let mut view = self.clone();
        view.credentials = Credentials::new(login, password);
        view
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Method and URL for a request.
    pub fn route(&self, request: &Request) -> Result<(Method, Url), TransportError> {
        let class = class_by_name(&request.class)
            .ok_or_else(|| TransportError::UnknownClass(request.class.clone()))?;
        let collection = class.api_path.ok_or_else(|| TransportError::Unsupported {
            transport: "api",
            class: request.class.clone(),
            action: request.action.to_string(),
        })?;
        let member = || -> Result<String, TransportError> {
            let id = request.id().ok_or_else(|| TransportError::Unsupported {
                transport: "api",
                class: request.class.clone(),
                action: format!("{} without an id", request.action),
            })?;
            Ok(format!("{collection}/{id}"))
        };

        let (method, path) = match &request.action {
            Action::Create => (Method::POST, collection.to_string()),
            Action::List => (Method::GET, collection.to_string()),
            Action::Info => (Method::GET, member()?),
            Action::Update => (Method::PUT, member()?),
            Action::Delete => (Method::DELETE, member()?),
            Action::Custom(name) => {
                let method = if PUT_ACTIONS.contains(&name.as_str()) {
                    Method::PUT
                } else {
                    Method::POST
                };
                let segment = PATH_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == name.as_str())
                    .map(|(_, path)| (*path).to_string())
                    .unwrap_or_else(|| name.replace('-', "_"));
                match request.id() {
                    Some(_) => (method, format!("{}/{segment}", member()?)),
                    None => (method, format!("{collection}/{segment}")),
                }
            }
        };
        let url = self.base_url.join(&path).map_err(|e| TransportError::Parse {
            context: path.clone(),
            reason: e.to_string(),
        })?;
        Ok((method, url))
    }
}

/// Request body: dashes become underscores and the routing id is dropped.
fn body_from(options: &Options) -> Map<String, Value> {
    options
        .iter()
        .filter(|(k, v)| k.as_str() != "id" && !v.is_null())
        .map(|(k, v)| (k.replace('-', "_"), v.clone()))
        .collect()
}

#[async_trait]
impl Transport for ApiTransport {
    fn kind(&self) -> &'static str {
        "api"
    }

    fn classes(&self) -> Vec<&'static str> {
        catalog::api_class_names()
    }

    async fn call(&self, request: Request) -> Result<TransportResult, TransportError> {
        let (method, mut url) = self.route(&request)?;
        let body = body_from(&request.options);
        let credentials = request.credentials.as_ref().unwrap_or(&self.credentials);

        if method == Method::GET && !body.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &body {
                pairs.append_pair(key, &display_value(value));
            }
        }

        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .basic_auth(&credentials.login, Some(&credentials.password));
        if let Some(attachment) = &request.attachment {
            let mut form = multipart::Form::new().part(
                "content",
                multipart::Part::bytes(attachment.content.clone())
                    .file_name(attachment.filename.clone()),
            );
            for (key, value) in &body {
                form = form.text(key.clone(), display_value(value));
            }
            builder = builder.multipart(form);
        } else if method != Method::GET && method != Method::DELETE {
            builder = builder.json(&body);
        }

        debug!(method = %method, url = %url, "API request");
        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|source| TransportError::Request {
                method: method.to_string(),
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                method: method.to_string(),
                url: url.to_string(),
                source,
            })?;
        let duration = start.elapsed();

        if !status.is_success() {
            warn!(method = %method, url = %url, status = status.as_u16(), "API request failed");
            return Err(TransportError::Http {
                status: status.as_u16(),
                method: method.to_string(),
                url: url.to_string(),
                body: text,
            });
        }
        debug!(method = %method, url = %url, duration_ms = duration.as_millis() as u64, "API request finished");

        let parsed: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Parse {
                context: format!("{method} {url}"),
                reason: e.to_string(),
            })?
        };
        // Collection responses wrap records in `results`.
        let output = match (request.action, parsed) {
            (Action::List, Value::Object(mut map)) if map.contains_key("results") => {
                map.remove("results").unwrap_or(Value::Null)
            }
            (_, other) => other,
        };
        Ok(TransportResult {
            status: i32::from(status.as_u16()),
            output: normalize_keys(output),
            stderr: String::new(),
            duration,
        })
    }
}
