//! # REST Transport
//!
//! The transport is the only way the data layer talks to the REST API. It is a
//! trait so the store can be driven by the real HTTP client, by a batch queue,
//! or by a test double.
//!
//! This module also holds the path helpers used to build request paths:
//! [`encode_uri_component`] for record identifiers and [`add_query_args`] for
//! query strings in PHP bracket notation.

pub mod http;

pub use http::HttpTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// HTTP methods used by the data layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single REST call descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub path: String,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>, method: Method) -> Self {
        Self {
            path: path.into(),
            method,
            data: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, Method::Get)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Issues REST requests and returns the decoded JSON response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<Value, TransportError>;
}

/// Percent-encode a path segment the way `encodeURIComponent` does.
pub fn encode_uri_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

/// Append query arguments to a path.
///
/// Nested objects and arrays use PHP bracket notation (`a[b]=1`, `a[0]=x`).
/// `null` values are skipped and an empty query leaves the path untouched.
pub fn add_query_args(path: &str, query: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        flatten_query_value(encode_uri_component(key), value, &mut pairs);
    }

    if pairs.is_empty() {
        return path.to_string();
    }

    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, pairs.join("&"))
}

fn flatten_query_value(prefix: String, value: &Value, pairs: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, nested) in map {
                let nested_prefix = format!("{}%5B{}%5D", prefix, encode_uri_component(key));
                flatten_query_value(nested_prefix, nested, pairs);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_query_value(format!("{}%5B{}%5D", prefix, index), nested, pairs);
            }
        }
        Value::String(text) => pairs.push(format!("{}={}", prefix, encode_uri_component(text))),
        Value::Bool(flag) => pairs.push(format!("{}={}", prefix, flag)),
        Value::Number(number) => pairs.push(format!("{}={}", prefix, number)),
    }
}
