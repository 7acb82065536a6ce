//! # Batch API
//!
//! [`CoreData::batch`] runs several save/delete operations and sends all of
//! their REST requests in one batch.
//!
//! Each callback receives a [`BatchApi`] whose operations route their request
//! through a [`BatchFetch`] transport. Instead of hitting the network, a
//! batch fetch queues the request and suspends. Once every callback is either
//! suspended on a queued request or finished, the queue is flushed through the
//! [`BatchProcessor`] and the results are handed back by index; the resumed
//! operations then dispatch their RECEIVE/FINISH actions and release their
//! locks. A callback that issues another request after resuming is served by
//! a further flush.
//!
//! A callback waiting for a record lock does not hold back the flush. When an
//! earlier operation of the batch holds that lock, the waiting operation gets
//! it once the flush has completed the holder, and its request goes out in the
//! next flush.

pub mod processor;

pub use processor::{
    BatchItemResult, BatchProcessor, RestBatchProcessor, SequentialProcessor, DEFAULT_MAX_ITEMS,
};

use crate::entities::RecordId;
use crate::error::{CoreDataError, CoreDataResult, TransportError};
use crate::locks::{Lock, LockCoordinator};
use crate::operations::{DeleteOptions, SaveOptions};
use crate::store::CoreData;
use crate::transport::{ApiRequest, Transport};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, Notify};

/// One operation of a batch
pub type BatchCallback<T> = Box<dyn FnOnce(BatchApi) -> BoxFuture<'static, CoreDataResult<T>> + Send>;

/// Box an async closure into a [`BatchCallback`]
pub fn batch_callback<T, F, Fut>(callback: F) -> BatchCallback<T>
where
    F: FnOnce(BatchApi) -> Fut + Send + 'static,
    Fut: Future<Output = CoreDataResult<T>> + Send + 'static,
{
    Box::new(move |api| Box::pin(callback(api)))
}

struct QueuedRequest {
    slot: usize,
    request: ApiRequest,
    responder: oneshot::Sender<Result<Value, TransportError>>,
}

#[derive(Default)]
struct BatchState {
    queue: Vec<QueuedRequest>,
    /// Callbacks that are neither finished nor waiting on a queued request
    running: HashSet<usize>,
    /// Callbacks waiting for a record lock
    waiting: HashSet<usize>,
}

struct Batch {
    state: Mutex<BatchState>,
    settled: Notify,
    processor: Arc<dyn BatchProcessor>,
}

impl Batch {
    fn new(processor: Arc<dyn BatchProcessor>) -> Self {
        Self {
            state: Mutex::new(BatchState::default()),
            settled: Notify::new(),
            processor,
        }
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, slot: usize) {
        self.state().running.insert(slot);
    }

    fn enqueue(&self, slot: usize, request: ApiRequest) -> oneshot::Receiver<Result<Value, TransportError>> {
        let (responder, receiver) = oneshot::channel();
        {
            let mut state = self.state();
            state.queue.push(QueuedRequest {
                slot,
                request,
                responder,
            });
            state.running.remove(&slot);
        }
        self.settled.notify_one();
        receiver
    }

    fn complete(&self, slot: usize) {
        {
            let mut state = self.state();
            state.running.remove(&slot);
            state.waiting.remove(&slot);
        }
        self.settled.notify_one();
    }

    fn start_waiting(&self, slot: usize) {
        {
            let mut state = self.state();
            state.running.remove(&slot);
            state.waiting.insert(slot);
        }
        self.settled.notify_one();
    }

    fn stop_waiting(&self, slot: usize) {
        let mut state = self.state();
        state.waiting.remove(&slot);
        state.running.insert(slot);
    }

    /// Flush the queue each time every callback has settled, until nothing is
    /// queued, running or waiting for a lock
    async fn run(&self) {
        loop {
            let queue = {
                let mut state = self.state();
                if !state.running.is_empty() {
                    None
                } else if !state.queue.is_empty() {
                    let queue = std::mem::take(&mut state.queue);
                    // mark resumed callbacks before they can finish
                    for queued in &queue {
                        state.running.insert(queued.slot);
                    }
                    Some(queue)
                } else if state.waiting.is_empty() {
                    return;
                } else {
                    None
                }
            };

            match queue {
                Some(queue) => self.flush(queue).await,
                None => self.settled.notified().await,
            }
        }
    }

    async fn flush(&self, queue: Vec<QueuedRequest>) {
        let requests: Vec<ApiRequest> = queue.iter().map(|queued| queued.request.clone()).collect();
        let expected = requests.len();
        debug!("📦 Flushing batch of {} requests", expected);

        let outcome = match self.processor.process(requests).await {
            Ok(results) if results.len() == expected => Ok(results),
            Ok(results) => Err(CoreDataError::BatchSizeMismatch {
                expected,
                actual: results.len(),
            }),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(results) => {
                for (queued, result) in queue.into_iter().zip(results) {
                    let result = match result {
                        BatchItemResult::Output(output) => Ok(output),
                        BatchItemResult::Error(error) => Err(error),
                    };
                    let _ = queued.responder.send(result);
                }
            }
            Err(error) => {
                warn!("❌ Batch of {} requests failed: {}", expected, error);
                for queued in queue {
                    let _ = queued
                        .responder
                        .send(Err(TransportError::BatchFailed(Box::new(error.clone()))));
                }
            }
        }
    }
}

/// Transport that defers requests into a batch
pub struct BatchFetch {
    batch: Arc<Batch>,
    slot: usize,
}

#[async_trait]
impl Transport for BatchFetch {
    async fn request(&self, request: ApiRequest) -> Result<Value, TransportError> {
        debug!("Queueing {} {} in batch", request.method, request.path);
        let receiver = self.batch.enqueue(self.slot, request);
        receiver
            .await
            .unwrap_or_else(|_| Err(TransportError::BatchFailed(Box::new(CoreDataError::BatchAborted))))
    }
}

/// Lock coordinator of one batch callback.
///
/// While the callback waits for a lock it does not count as running, so the
/// requests queued so far can be flushed.
struct BatchLocks {
    batch: Arc<Batch>,
    slot: usize,
    inner: Arc<dyn LockCoordinator>,
}

/// Marks a slot as waiting for a lock until dropped
struct LockWait<'a> {
    batch: &'a Batch,
    slot: usize,
}

impl<'a> LockWait<'a> {
    fn new(batch: &'a Batch, slot: usize) -> Self {
        batch.start_waiting(slot);
        Self { batch, slot }
    }
}

impl Drop for LockWait<'_> {
    fn drop(&mut self) {
        self.batch.stop_waiting(self.slot);
    }
}

#[async_trait]
impl LockCoordinator for BatchLocks {
    async fn acquire(&self, path: Vec<String>, exclusive: bool) -> CoreDataResult<Lock> {
        let _waiting = LockWait::new(&self.batch, self.slot);
        self.inner.acquire(path, exclusive).await
    }

    fn release(&self, lock: Lock) {
        self.inner.release(lock);
    }
}

/// Operations available to a batch callback
#[derive(Clone)]
pub struct BatchApi {
    store: CoreData,
    fetch: Arc<dyn Transport>,
    locks: Arc<dyn LockCoordinator>,
}

impl BatchApi {
    pub fn store(&self) -> &CoreData {
        &self.store
    }

    pub async fn save_entity_record(&self, kind: &str, name: &str, record: Value) -> CoreDataResult<Value> {
        self.store
            .save_entity_record(kind, name, record, self.save_options())
            .await
            .map_err(unwrap_batch_error)
    }

    pub async fn save_edited_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
    ) -> CoreDataResult<Option<Value>> {
        self.store
            .save_edited_entity_record(
                kind,
                name,
                record_id,
                self.save_options(),
            )
            .await
            .map_err(unwrap_batch_error)
    }

    pub async fn delete_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
        query: Option<Map<String, Value>>,
    ) -> CoreDataResult<Value> {
        self.store
            .delete_entity_record(
                kind,
                name,
                record_id,
                query,
                DeleteOptions::default()
                    .with_fetch(self.fetch.clone())
                    .with_locks(self.locks.clone()),
            )
            .await
            .map_err(unwrap_batch_error)
    }

    fn save_options(&self) -> SaveOptions {
        SaveOptions::default()
            .with_fetch(self.fetch.clone())
            .with_locks(self.locks.clone())
    }

    pub fn edit_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
        edits: Value,
    ) -> CoreDataResult<()> {
        self.store.edit_entity_record(kind, name, record_id, edits)
    }
}

/// Callers see an aggregate batch failure as the error itself
fn unwrap_batch_error(error: CoreDataError) -> CoreDataError {
    match error {
        CoreDataError::Transport(TransportError::BatchFailed(error)) => *error,
        other => other,
    }
}

impl CoreData {
    /// Run `callbacks` as one batch with the store's batch processor.
    ///
    /// Results are returned in callback order.
    pub async fn batch<T>(&self, callbacks: Vec<BatchCallback<T>>) -> Vec<CoreDataResult<T>> {
        self.batch_with_processor(callbacks, self.batch_processor()).await
    }

    pub async fn batch_with_processor<T>(
        &self,
        callbacks: Vec<BatchCallback<T>>,
        processor: Arc<dyn BatchProcessor>,
    ) -> Vec<CoreDataResult<T>> {
        let batch = Arc::new(Batch::new(processor));

        // every callback is registered before any of them runs
        let operations: Vec<_> = callbacks
            .into_iter()
            .enumerate()
            .map(|(slot, callback)| {
                batch.register(slot);
                let api = BatchApi {
                    store: self.clone(),
                    fetch: Arc::new(BatchFetch {
                        batch: batch.clone(),
                        slot,
                    }),
                    locks: Arc::new(BatchLocks {
                        batch: batch.clone(),
                        slot,
                        inner: self.locks(),
                    }),
                };
                let operation = callback(api);
                let batch = batch.clone();
                async move {
                    let result = operation.await;
                    batch.complete(slot);
                    result
                }
            })
            .collect();

        let ((), results) = tokio::join!(batch.run(), join_all(operations));
        results
    }
}
