//! HTTP client for the Panel backend.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::{PluginError, Result};

/// Client for the Panel backend API.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct PanelClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl std::fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_token.is_some())
            .finish()
    }
}

impl PanelClient {
    /// Create a client from the runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PluginError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    /// Create an unauthenticated client for a base URL with default timeouts.
    pub fn from_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(&RuntimeConfig::with_base_url(base_url))
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an absolute URL for a backend path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn builder(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header("Accept", "application/json");
        if let Some(ref token) = self.api_token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// GET a path and decode the JSON body as-is.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.builder(Method::GET, path).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PluginError::api(
                status.as_u16(),
                format!("GET {} failed", path),
            ));
        }

        Ok(response.json().await?)
    }

    /// GET a path and return the raw body bytes.
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.builder(Method::GET, path).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PluginError::api(
                status.as_u16(),
                format!("GET {} failed", path),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Send a JSON request and unwrap the backend envelope.
    ///
    /// The backend answers either with `{ "success", "data", "error" }` or
    /// with a bare JSON document. A failed status or a `success: false`
    /// envelope both become [`PluginError::Api`].
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut req = self.builder(method.clone(), path);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: Option<Value> = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(envelope_error)
                .unwrap_or_else(|| format!("{} {} failed", method, path));
            return Err(PluginError::api(status.as_u16(), message));
        }

        match parsed {
            None if text.trim().is_empty() => Ok(Value::Null),
            None => Err(PluginError::SerializationError(format!(
                "{} {} returned a non-JSON body",
                method, path
            ))),
            Some(value) => unwrap_envelope(status.as_u16(), value),
        }
    }
}

fn envelope_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_envelope(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("success") || obj.contains_key("data"))
}

fn unwrap_envelope(status: u16, value: Value) -> Result<Value> {
    if !is_envelope(&value) {
        return Ok(value);
    }

    let success = value.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !success {
        let message = envelope_error(&value).unwrap_or_else(|| "request failed".to_string());
        return Err(PluginError::api(status, message));
    }

    match value {
        Value::Object(mut obj) => Ok(obj.remove("data").unwrap_or(Value::Null)),
        other => Ok(other),
    }
}
