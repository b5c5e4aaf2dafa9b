//! Proxy client and response envelope decoding
//!
//! Every proxy answer is wrapped as
//! `{"response": {"result": bool, "reason": "...", "response": {...}}}`.
//! A `false` result is an error; a vehicle out of BLE range is reported as
//! [`ProxyError::Unreachable`] so callers can treat it as an offline reading.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Substring of a failure reason meaning the vehicle is out of BLE range
const NOT_IN_RANGE: &str = "vehicle not in range";

/// Payload of a successful response, if any
pub type ProxyResponse = Option<Map<String, Value>>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("vehicle unreachable: {0}")]
    Unreachable(String),
    #[error("command failed: {0}")]
    Rejected(String),
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no {0} in response")]
    MissingField(&'static str),
}

impl ProxyError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ProxyError::Unreachable(_))
    }
}

/// Access to the proxy REST API
#[async_trait]
pub trait ProxyApi: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<ProxyResponse, ProxyError>;

    async fn post(&self, endpoint: &str, body: Option<&str>) -> Result<ProxyResponse, ProxyError>;
}

/// Decode a response body
pub fn decode_envelope(body: &str) -> Result<ProxyResponse, ProxyError> {
    let value: Value = serde_json::from_str(body)?;
    let response = value
        .get("response")
        .and_then(Value::as_object)
        .ok_or(ProxyError::MissingField("response"))?;
    let result = response
        .get("result")
        .and_then(Value::as_bool)
        .ok_or(ProxyError::MissingField("result"))?;

    if !result {
        let reason = response
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string();
        if reason.contains(NOT_IN_RANGE) {
            return Err(ProxyError::Unreachable(reason));
        }
        return Err(ProxyError::Rejected(reason));
    }

    Ok(response
        .get("response")
        .and_then(Value::as_object)
        .cloned())
}

/// HTTP client for a proxy instance
#[derive(Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyClient {
    /// Create a client for `base_url` (scheme and host, no path)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ProxyResponse, ProxyError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, len = body.len(), "Proxy response");
        decode_envelope(&body)
    }
}

#[async_trait]
impl ProxyApi for ProxyClient {
    async fn get(&self, endpoint: &str) -> Result<ProxyResponse, ProxyError> {
        let url = self.url(endpoint);
        debug!(url = %url, "Proxy GET");
        self.send(self.client.get(&url)).await
    }

    async fn post(&self, endpoint: &str, body: Option<&str>) -> Result<ProxyResponse, ProxyError> {
        let url = self.url(endpoint);
        debug!(url = %url, body = body.unwrap_or(""), "Proxy POST");
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        self.send(request).await
    }
}
