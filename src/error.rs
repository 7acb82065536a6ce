//! # Core Data Error Handling
//!
//! Unified error types for the entity data layer.
//!
//! Errors fall into three groups:
//! - configuration errors (unknown entity, entity config not loaded, invalid
//!   configuration) which are returned before any side effect happens
//! - transport errors which travel through the FINISH lifecycle action and are
//!   then returned to the caller
//! - batch errors which either fail a whole batch or a single batch item
//!
//! Every error is `Clone` so that one aggregate batch failure can be fanned out
//! to all the operations that were waiting on it.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors produced by a [`Transport`](crate::transport::Transport) or a batch processor.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A single request inside a batch was rejected by the server
    #[error("Batch item rejected: {message}")]
    BatchItem {
        code: Option<String>,
        message: String,
        body: Value,
    },

    /// The whole batch carrying this request failed
    #[error("Batch failed: {0}")]
    BatchFailed(Box<CoreDataError>),
}

impl TransportError {
    /// Build a [`TransportError::BatchItem`] from a WordPress error body
    /// (`{"code": "...", "message": "...", "data": {...}}`).
    pub fn from_batch_body(body: Value) -> Self {
        let code = body.get("code").and_then(Value::as_str).map(str::to_string);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "unknown batch error".to_string());
        TransportError::BatchItem {
            code,
            message,
            body,
        }
    }
}

/// Unified error type for core data operations.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum CoreDataError {
    /// No entity descriptor is registered (or loadable) for the pair
    #[error("No entity config found for ({kind}, {name})")]
    EntityNotFound { kind: String, name: String },

    /// An edit was attempted before the entity descriptor was loaded
    #[error("The entity being edited ({kind}, {name}) does not have a loaded config.")]
    EntityConfigNotLoaded { kind: String, name: String },

    /// The record handed to an operation is not usable
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Errors coming from the REST transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A batch processor returned the wrong number of results
    #[error("Batch processor returned {actual} results for {expected} requests")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// The batch holding a deferred request went away before flushing it
    #[error("Batch was dropped before the request was processed")]
    BatchAborted,

    /// The operation future was dropped after its START action
    #[error("Operation was dropped before it finished")]
    Aborted,

    /// Errors from the lock coordinator
    #[error("Lock error: {0}")]
    Lock(String),

    /// Invalid configuration or logging setup
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreDataError {
    /// Returns true for programmer/setup errors that are never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CoreDataError::EntityNotFound { .. }
                | CoreDataError::EntityConfigNotLoaded { .. }
                | CoreDataError::Config(_)
        )
    }
}

impl From<serde_json::Error> for CoreDataError {
    fn from(error: serde_json::Error) -> Self {
        CoreDataError::Transport(TransportError::InvalidResponse(error.to_string()))
    }
}

impl From<toml::de::Error> for CoreDataError {
    fn from(error: toml::de::Error) -> Self {
        CoreDataError::Config(error.to_string())
    }
}

impl From<std::io::Error> for CoreDataError {
    fn from(error: std::io::Error) -> Self {
        CoreDataError::Config(error.to_string())
    }
}

/// Result type alias for core data operations.
pub type CoreDataResult<T> = Result<T, CoreDataError>;
