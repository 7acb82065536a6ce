//! # Core Data Library
//!
//! Client-side data layer for a WordPress-style REST API. It keeps a cache of
//! entity records, tracks local edits, and coordinates the saves and deletes
//! that push those records back to the server.
//!
//! ## Core Components
//!
//! * `store` - The [`CoreData`] store: record cache, actions, selectors and resolvers
//! * `operations` - Save, delete and edit orchestration with lifecycle actions
//! * `batch` - Batching of several operations into one REST batch request
//! * `locks` - Hierarchical path locks serializing operations on the same record
//! * `entities` - Entity descriptors, record identifiers and the default registry
//! * `transport` - REST transport trait, HTTP client and path helpers
//! * `config` - TOML/environment configuration
//! * `logging` - `env_logger` bootstrap
//! * `error` - Error types and handling
//!
//! ## Architecture
//!
//! Every change to the cache is an action reduced by the store and then
//! published to observers. Saves and deletes take an exclusive lock on the
//! record, emit a START action, call the transport, emit RECEIVE/REMOVE on
//! success and a FINISH action in every case, and only then release the lock.
//! Inside a batch the transport call is deferred into a shared queue that is
//! flushed once through a batch processor.

pub mod batch;
pub mod config;
pub mod entities;
pub mod error;
pub mod locks;
pub mod logging;
pub mod operations;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use batch::{
    batch_callback, BatchApi, BatchCallback, BatchItemResult, BatchProcessor, RestBatchProcessor,
    SequentialProcessor,
};
pub use config::CoreDataConfig;
pub use entities::{EntityDescriptor, RecordId};
pub use error::{CoreDataError, CoreDataResult, TransportError};
pub use locks::{Lock, LockCoordinator, LockEngine, LockGuard};
pub use operations::{DeleteOptions, SaveOptions};
pub use store::{ActionObserver, CoreData, CoreDataBuilder, StoreAction};
pub use transport::{ApiRequest, HttpTransport, Method, Transport};
