//! # Backend
//!
//! The REST collaborator as seen by the freshness layer: one read call per
//! collection endpoint and one write call per mutation. Schemas, business
//! validation and persistence are the backend's concern.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{SyncError, SyncResult};
use super::event::ChangeCause;

/// HTTP verb of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether repeating the request leaves the backend in the same state
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Method::Put | Method::Delete)
    }

    /// Change cause announced after this verb succeeds
    pub fn cause(&self) -> ChangeCause {
        match self {
            Method::Post => ChangeCause::Create,
            Method::Put | Method::Patch => ChangeCause::Update,
            Method::Delete => ChangeCause::Delete,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One create/update/delete call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub method: Method,

    /// Resource path relative to the backend base URL, e.g. `/usuarios/7`
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Mutation {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Read and write access to the REST backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET` an endpoint and return its JSON body
    async fn read(&self, endpoint: &str) -> SyncResult<Value>;

    /// Perform a mutation and return the backend's acknowledgement body
    async fn write(&self, mutation: &Mutation) -> SyncResult<Value>;
}

/// Backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Attach the session's bearer token to every request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Absolute URL for a path relative to the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn body_of(response: reqwest::Response) -> SyncResult<Value> {
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn read(&self, endpoint: &str) -> SyncResult<Value> {
        let request = self.authorize(self.client.get(self.url(endpoint)));
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Fetch {
                endpoint: endpoint.to_string(),
                message: format!("status {}", status.as_u16()),
            });
        }

        Self::body_of(response).await
    }

    async fn write(&self, mutation: &Mutation) -> SyncResult<Value> {
        let url = self.url(&mutation.path);
        let request = match mutation.method {
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        let request = match &mutation.body {
            Some(body) => self.authorize(request).json(body),
            None => self.authorize(request),
        };

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Mutation {
                method: mutation.method.to_string(),
                path: mutation.path.clone(),
                status: status.as_u16(),
                message,
            });
        }

        Self::body_of(response).await
    }
}
