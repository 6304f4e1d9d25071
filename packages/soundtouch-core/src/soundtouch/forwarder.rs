//! Relays requests to a device's native HTTP API.
//!
//! The forwarder is stateless and never retries; a failed call surfaces as
//! [`ForwardError`] and the caller decides what to do. Device payloads and
//! status codes pass through untouched so the UI can render native errors.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;

use super::discovery::DeviceEndpoint;
use crate::protocol_constants::POLLING_PATHS;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while forwarding to a device.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Connection refused, reset, or timed out.
    #[error("device {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// The device answered with a non-success status.
    #[error("device returned HTTP {status}")]
    DeviceError {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
}

/// Convenient Result alias for forwarding operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

impl ForwardError {
    /// Returns true if the device could not be reached at all.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    fn unreachable(endpoint: &DeviceEndpoint, err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        };
        Self::Unreachable {
            address: endpoint.address.clone(),
            reason,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP methods the native API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// One call against the native API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRequest {
    pub method: HttpMethod,
    /// Path relative to the API root, e.g. `/now_playing`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub body: Option<Bytes>,
}

impl NativeRequest {
    /// A `GET` with no body.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: normalize_path(path.into()),
            query: None,
            body: None,
        }
    }

    /// A `POST` carrying an XML body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: normalize_path(path.into()),
            query: None,
            body: Some(body.into()),
        }
    }

    /// Attaches a raw query string.
    #[must_use]
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.is_empty());
        self
    }

    /// Body as text, for logging and tests.
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        match &self.body {
            Some(body) => String::from_utf8_lossy(body),
            None => Cow::Borrowed(""),
        }
    }

    fn url(&self, endpoint: &DeviceEndpoint) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", endpoint.url(&self.path), query),
            None => endpoint.url(&self.path),
        }
    }

    /// Whether the UI polls this path continuously.
    fn is_polling(&self) -> bool {
        let path = self.path.trim_start_matches('/');
        self.method == HttpMethod::Get && POLLING_PATHS.contains(&path)
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

/// A successful device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl DeviceResponse {
    /// Body as text.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarder
// ─────────────────────────────────────────────────────────────────────────────

/// Sends native API requests to devices.
#[async_trait]
pub trait CommandForwarder: Send + Sync {
    /// Relays `request` to `endpoint`.
    ///
    /// # Errors
    /// * `Unreachable` - connection failure or timeout
    /// * `DeviceError` - the device answered with a non-success status
    async fn forward(
        &self,
        endpoint: &DeviceEndpoint,
        request: &NativeRequest,
    ) -> ForwardResult<DeviceResponse>;
}

/// Forwarder over HTTP using a shared `reqwest` client.
pub struct HttpForwarder {
    client: Client,
    timeout: Duration,
}

impl HttpForwarder {
    /// Creates a forwarder; every request is bounded by `timeout`.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl CommandForwarder for HttpForwarder {
    async fn forward(
        &self,
        endpoint: &DeviceEndpoint,
        request: &NativeRequest,
    ) -> ForwardResult<DeviceResponse> {
        let url = request.url(endpoint);

        if request.is_polling() {
            log::trace!("[Forward] {} {}", request.method, url);
        } else {
            log::info!("[Forward] {} {}", request.method, url);
            if request.body.is_some() {
                log::debug!("[Forward] Request body: {}", request.body_text());
            }
        }

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        let builder = match &request.body {
            Some(body) => builder
                .header("Content-Type", "application/xml")
                .body(body.clone()),
            None => builder,
        };

        let start = Instant::now();
        let res = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                log::warn!("[Forward] {} {} failed: {}", request.method, url, e);
                ForwardError::unreachable(endpoint, &e)
            })?;

        let status = res.status();
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = res
            .bytes()
            .await
            .map_err(|e| ForwardError::unreachable(endpoint, &e))?;

        log::debug!(
            "[Forward] {} {} completed in {:?}: {}",
            request.method,
            url,
            start.elapsed(),
            status
        );

        if !status.is_success() {
            return Err(ForwardError::DeviceError {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        Ok(DeviceResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
