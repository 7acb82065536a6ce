//! Shared fixtures for core data integration tests
//!
//! Every fixture writes into one event log so tests can assert the relative
//! order of lock operations, dispatched actions and network requests.

#![allow(dead_code)]

use async_trait::async_trait;
use core_data::{
    ApiRequest, CoreData, CoreDataResult, EntityDescriptor, Lock, LockCoordinator, LockEngine,
    StoreAction, Transport, TransportError,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Lock path prefix of `postType/post` records, as logged by [`RecordingLocks`]
pub const POST_LOCK_PREFIX: &str = "entities/data/postType/post";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Transport double that records requests and answers from a script.
///
/// When the script is empty the request body is echoed back (`{}` without a
/// body).
pub struct MockTransport {
    requests: Mutex<Vec<ApiRequest>>,
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    delay: Option<Duration>,
    log: EventLog,
}

impl MockTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            delay: None,
            log,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, response: Value) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn fail(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: ApiRequest) -> Result<Value, TransportError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("request {} {}", request.method, request.path));
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(request.data.unwrap_or_else(|| serde_json::json!({}))))
    }
}

/// Lock engine that logs every grant and release
pub struct RecordingLocks {
    engine: LockEngine,
    log: EventLog,
}

impl RecordingLocks {
    pub fn new(log: EventLog) -> Self {
        Self {
            engine: LockEngine::new(),
            log,
        }
    }
}

#[async_trait]
impl LockCoordinator for RecordingLocks {
    async fn acquire(&self, path: Vec<String>, exclusive: bool) -> CoreDataResult<Lock> {
        let lock = self.engine.acquire(path, exclusive).await?;
        self.log
            .lock()
            .unwrap()
            .push(format!("acquire {}", lock.path.join("/")));
        Ok(lock)
    }

    fn release(&self, lock: Lock) {
        self.log
            .lock()
            .unwrap()
            .push(format!("release {}", lock.path.join("/")));
        self.engine.release(lock);
    }
}

pub struct Fixture {
    pub store: CoreData,
    pub transport: Arc<MockTransport>,
    pub log: EventLog,
}

impl Fixture {
    /// Store with the default entities plus `postType/post` at `/wp/v2/posts`
    pub fn new() -> Self {
        Self::build(|transport| transport)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self::build(move |transport| transport.with_delay(delay))
    }

    fn build(configure: impl FnOnce(MockTransport) -> MockTransport) -> Self {
        init_logging();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(configure(MockTransport::new(log.clone())));

        let store = CoreData::builder(transport.clone())
            .locks(Arc::new(RecordingLocks::new(log.clone())))
            .entities(vec![post_entity()])
            .build();

        let observer_log = log.clone();
        store.add_observer(Arc::new(move |action: &StoreAction| {
            observer_log
                .lock()
                .unwrap()
                .push(action.action_type().to_string());
        }));

        Self {
            store,
            transport,
            log,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|logged| logged == event)
            .unwrap_or_else(|| panic!("event {event:?} not logged in {:?}", self.events()))
    }
}

pub fn post_entity() -> EntityDescriptor {
    EntityDescriptor::new("postType", "post", "/wp/v2/posts")
        .with_transient_edits(&["blocks", "selection"])
        .with_merged_edits(&["meta"])
}
