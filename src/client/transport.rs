//! Backend transport
//!
//! One configurable JSON-over-HTTP endpoint. Every request body carries an
//! `action` tag plus action-specific fields; the API key is attached when
//! configured. The trait seam lets tests drive the client with a scripted
//! backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Request body sent to the backend
#[derive(Debug, Clone, Serialize)]
pub struct ApiRequest {
    pub action: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ApiRequest {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            fields: Map::new(),
            api_key: None,
        }
    }

    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        self.api_key = api_key.map(str::to_string);
        self
    }
}

/// Conflict reported by the backend for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConflict {
    pub key: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parsed backend response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ServerConflict>,
    #[serde(default, rename = "isLocked")]
    pub is_locked: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    /// A locked record or a non-empty conflict list is a conflict outcome,
    /// never retried.
    pub fn is_conflict(&self) -> bool {
        self.is_locked || !self.conflicts.is_empty()
    }
}

/// Raw HTTP-level outcome, before classification
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    /// `Retry-After` header in seconds, when present.
    pub retry_after_secs: Option<u64>,
    /// Parsed body; absent when the server returned a non-JSON error page.
    pub body: Option<ApiResponse>,
}

/// Transport-level failure, before any HTTP status is known
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// One network send. Implementations must not retry internally; retry and
/// circuit policy live in the request client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// Production transport over reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// The reqwest client carries no timeout of its own; the request client
    /// races every send against its configured deadline.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = if response.status().is_success() {
            let parsed = response
                .json::<ApiResponse>()
                .await
                .map_err(|e| TransportError::InvalidBody(e.to_string()))?;
            Some(parsed)
        } else {
            // Error pages are often HTML; the status code is enough.
            None
        };

        Ok(RawResponse {
            status,
            retry_after_secs,
            body,
        })
    }
}
