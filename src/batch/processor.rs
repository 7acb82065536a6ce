//! Batch processors
//!
//! A processor turns the queued requests of one batch into one result per
//! request, in request order.

use crate::error::{CoreDataError, CoreDataResult, TransportError};
use crate::transport::{ApiRequest, Method, Transport};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Items per batch request when the server does not announce a limit
pub const DEFAULT_MAX_ITEMS: usize = 25;

/// Outcome of one request inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemResult {
    Output(Value),
    Error(TransportError),
}

impl From<Result<Value, TransportError>> for BatchItemResult {
    fn from(result: Result<Value, TransportError>) -> Self {
        match result {
            Ok(output) => BatchItemResult::Output(output),
            Err(error) => BatchItemResult::Error(error),
        }
    }
}

/// Sends the requests of a batch and returns their results in the same order.
///
/// An `Err` fails every request of the batch; a [`BatchItemResult::Error`]
/// fails only its own request.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, requests: Vec<ApiRequest>) -> CoreDataResult<Vec<BatchItemResult>>;
}

/// Sends batches to the REST batch endpoint (`/batch/v1`)
pub struct RestBatchProcessor {
    transport: Arc<dyn Transport>,
    endpoint: String,
    max_items: OnceCell<usize>,
}

impl RestBatchProcessor {
    /// With `max_items` unset, the limit is read once from `OPTIONS endpoint`.
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>, max_items: Option<usize>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            max_items: OnceCell::new_with(max_items.filter(|max| *max > 0)),
        }
    }

    async fn max_items(&self) -> CoreDataResult<usize> {
        self.max_items
            .get_or_try_init(|| async {
                let response = self
                    .transport
                    .request(ApiRequest::new(self.endpoint.clone(), Method::Options))
                    .await?;
                let max_items = response
                    .pointer("/endpoints/0/args/requests/maxItems")
                    .and_then(Value::as_u64)
                    .map(|max| max as usize)
                    .filter(|max| *max > 0)
                    .unwrap_or(DEFAULT_MAX_ITEMS);
                info!("Batch endpoint {} accepts {} items per request", self.endpoint, max_items);
                Ok::<usize, CoreDataError>(max_items)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl BatchProcessor for RestBatchProcessor {
    async fn process(&self, requests: Vec<ApiRequest>) -> CoreDataResult<Vec<BatchItemResult>> {
        let max_items = self.max_items().await?;
        let mut results = Vec::with_capacity(requests.len());

        for chunk in requests.chunks(max_items) {
            let body = json!({
                "validation": "require-all-validate",
                "requests": chunk.iter().map(batch_entry).collect::<Vec<_>>(),
            });
            debug!("📦 POST {} with {} requests", self.endpoint, chunk.len());
            let response = self
                .transport
                .request(ApiRequest::new(self.endpoint.clone(), Method::Post).with_data(body))
                .await?;
            results.extend(parse_batch_response(&response)?);
        }

        Ok(results)
    }
}

fn batch_entry(request: &ApiRequest) -> Value {
    let mut entry = json!({
        "path": request.path,
        "method": request.method,
    });
    if let Some(data) = &request.data {
        entry["body"] = data.clone();
    }
    entry
}

fn parse_batch_response(response: &Value) -> CoreDataResult<Vec<BatchItemResult>> {
    let responses = response
        .get("responses")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TransportError::InvalidResponse("batch response has no responses".to_string())
        })?;

    let failed = matches!(response.get("failed"), Some(failed) if !failed.is_null() && *failed != Value::Bool(false));
    if failed {
        warn!("Batch request failed validation: {}", response["failed"]);
    }

    Ok(responses
        .iter()
        .map(|item| {
            let body = item.get("body").cloned().unwrap_or(Value::Null);
            let status = item.get("status").and_then(Value::as_u64).unwrap_or(0);
            if !failed && (200..300).contains(&status) {
                BatchItemResult::Output(body)
            } else {
                BatchItemResult::Error(TransportError::from_batch_body(body))
            }
        })
        .collect())
}

/// Issues every request on its own, in order
pub struct SequentialProcessor {
    transport: Arc<dyn Transport>,
}

impl SequentialProcessor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl BatchProcessor for SequentialProcessor {
    async fn process(&self, requests: Vec<ApiRequest>) -> CoreDataResult<Vec<BatchItemResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.transport.request(request).await.into());
        }
        Ok(results)
    }
}
