//! HTTP transport backed by `reqwest`

use super::{ApiRequest, Method, Transport};
use crate::config::TransportConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Header carrying the REST nonce
const NONCE_HEADER: &str = "X-WP-Nonce";

/// Sends requests to `root_url + path` and decodes JSON responses.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    root_url: String,
    nonce: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            root_url: config.root_url.trim_end_matches('/').to_string(),
            nonce: config.nonce.clone(),
        })
    }

    /// Replace the nonce, e.g. after the session refreshed it
    pub fn set_nonce(&mut self, nonce: Option<String>) {
        self.nonce = nonce;
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.root_url, path)
        } else {
            format!("{}/{}", self.root_url, path)
        }
    }

    fn method_for(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<Value, TransportError> {
        let url = self.url_for(&request.path);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(Self::method_for(request.method), &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(nonce) = &self.nonce {
            builder = builder.header(NONCE_HEADER, nonce);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!("{} {} failed with status {}", request.method, url, status);
            return Err(status_error(status, &body));
        }

        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

/// Map a non-success response to a [`TransportError::Status`], reading the
/// REST error body (`{"code": ..., "message": ...}`) when there is one.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    TransportError::Status {
        status: status.as_u16(),
        code,
        message,
    }
}
