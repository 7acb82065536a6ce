//! # Core Data Store
//!
//! [`CoreData`] ties the data layer together: it owns the record cache, the
//! action bus, the lock coordinator, the REST transport and the batch
//! processor. It is cheap to clone; clones share the same state.
//!
//! The orchestrators (`save_entity_record`, `delete_entity_record`,
//! `edit_entity_record`) live in [`crate::operations`] and the batch API in
//! [`crate::batch`]. This module holds dispatching, selectors, entity
//! resolution and the read resolvers.

pub mod actions;
pub mod bus;
pub mod cache;

pub use actions::StoreAction;
pub use bus::{ActionBus, ActionConsumer, ActionObserver};
pub use cache::{RecordCache, RequestState};

use crate::batch::{BatchProcessor, RestBatchProcessor, SequentialProcessor};
use crate::config::CoreDataConfig;
use crate::entities::{default_entities, EntityDescriptor, KindLoader, RecordId};
use crate::error::{CoreDataError, CoreDataResult};
use crate::locks::{LockCoordinator, LockEngine};
use crate::transport::{add_query_args, ApiRequest, HttpTransport, Transport};
use log::{debug, info};
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct CoreDataInner {
    config: CoreDataConfig,
    cache: RwLock<RecordCache>,
    bus: ActionBus,
    locks: Arc<dyn LockCoordinator>,
    transport: Arc<dyn Transport>,
    batch_processor: Arc<dyn BatchProcessor>,
}

/// Entity data store
#[derive(Clone)]
pub struct CoreData {
    inner: Arc<CoreDataInner>,
}

/// Builder for [`CoreData`]
pub struct CoreDataBuilder {
    transport: Arc<dyn Transport>,
    config: CoreDataConfig,
    locks: Option<Arc<dyn LockCoordinator>>,
    batch_processor: Option<Arc<dyn BatchProcessor>>,
    entities: Vec<EntityDescriptor>,
    observers: Vec<Arc<dyn ActionObserver>>,
}

impl CoreDataBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: CoreDataConfig::default(),
            locks: None,
            batch_processor: None,
            entities: default_entities(),
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: CoreDataConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom lock coordinator instead of a fresh [`LockEngine`]
    pub fn locks(mut self, locks: Arc<dyn LockCoordinator>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Use a custom batch processor instead of the one derived from the config
    pub fn batch_processor(mut self, processor: Arc<dyn BatchProcessor>) -> Self {
        self.batch_processor = Some(processor);
        self
    }

    /// Register additional entity descriptors
    pub fn entities(mut self, entities: Vec<EntityDescriptor>) -> Self {
        self.entities.extend(entities);
        self
    }

    /// Start without the built-in `root` entities
    pub fn without_default_entities(mut self) -> Self {
        self.entities.retain(|entity| entity.kind != "root");
        self
    }

    /// Observe every dispatched action, including the initial `ADD_ENTITIES`
    pub fn observer(mut self, observer: Arc<dyn ActionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> CoreData {
        let batch_processor = self.batch_processor.unwrap_or_else(|| {
            match &self.config.batch.endpoint {
                Some(endpoint) => Arc::new(RestBatchProcessor::new(
                    self.transport.clone(),
                    endpoint.clone(),
                    self.config.batch.max_items,
                )) as Arc<dyn BatchProcessor>,
                None => Arc::new(SequentialProcessor::new(self.transport.clone()))
                    as Arc<dyn BatchProcessor>,
            }
        });

        let bus = ActionBus::new();
        for observer in self.observers {
            bus.add_observer(observer);
        }

        let store = CoreData {
            inner: Arc::new(CoreDataInner {
                config: self.config,
                cache: RwLock::new(RecordCache::new()),
                bus,
                locks: self
                    .locks
                    .unwrap_or_else(|| Arc::new(LockEngine::new()) as Arc<dyn LockCoordinator>),
                transport: self.transport,
                batch_processor,
            }),
        };

        if !self.entities.is_empty() {
            store.dispatch(StoreAction::AddEntities {
                entities: self.entities,
            });
        }
        store
    }
}

impl CoreData {
    pub fn builder(transport: Arc<dyn Transport>) -> CoreDataBuilder {
        CoreDataBuilder::new(transport)
    }

    /// Store with default entities, a fresh lock engine and the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Store talking HTTP to the API described by `config`
    pub fn from_config(config: CoreDataConfig) -> CoreDataResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.transport)?;
        info!("Core data store using REST root {}", config.transport.root_url);
        Ok(Self::builder(Arc::new(transport)).config(config).build())
    }

    pub fn config(&self) -> &CoreDataConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn locks(&self) -> Arc<dyn LockCoordinator> {
        self.inner.locks.clone()
    }

    pub(crate) fn batch_processor(&self) -> Arc<dyn BatchProcessor> {
        self.inner.batch_processor.clone()
    }

    fn cache(&self) -> RwLockReadGuard<'_, RecordCache> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_mut(&self) -> RwLockWriteGuard<'_, RecordCache> {
        self.inner
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reduce an action into the cache, then publish it
    pub fn dispatch(&self, action: StoreAction) {
        debug!("dispatch {}", action.action_type());
        self.cache_mut().reduce(&action);
        self.inner.bus.publish(&action);
    }

    pub fn subscribe(&self) -> ActionConsumer {
        self.inner.bus.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn ActionObserver>) {
        self.inner.bus.add_observer(observer);
    }

    /// Run a selector against a consistent view of the cache
    pub fn select<R>(&self, selector: impl FnOnce(&RecordCache) -> R) -> R {
        selector(&self.cache())
    }

    // ========== Entity resolution ==========

    /// Descriptor of a loaded entity, without any network call
    pub fn get_entity(&self, kind: &str, name: &str) -> Option<EntityDescriptor> {
        self.cache().get_entity(kind, name).cloned()
    }

    /// Descriptors of `kind`, loading them from the REST API the first time
    /// when the kind has a loader
    pub async fn get_kind_entities(&self, kind: &str) -> CoreDataResult<Vec<EntityDescriptor>> {
        let known = self.cache().get_entities_by_kind(kind);
        if !known.is_empty() {
            return Ok(known);
        }

        let Some(loader) = KindLoader::for_kind(kind) else {
            return Ok(Vec::new());
        };
        let entities = loader.load(self.inner.transport.as_ref()).await?;
        self.dispatch(StoreAction::AddEntities {
            entities: entities.clone(),
        });
        Ok(entities)
    }

    pub(crate) async fn resolve_entity(&self, kind: &str, name: &str) -> CoreDataResult<EntityDescriptor> {
        self.get_kind_entities(kind)
            .await?
            .into_iter()
            .find(|entity| entity.matches(kind, name))
            .ok_or_else(|| CoreDataError::EntityNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    // ========== Selectors ==========

    pub fn get_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> Option<Map<String, Value>> {
        self.cache().get_entity_record(kind, name, &id.into())
    }

    pub fn get_raw_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> Option<Map<String, Value>> {
        self.cache().get_raw_entity_record(kind, name, &id.into())
    }

    pub fn get_edited_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> Map<String, Value> {
        self.cache().get_edited_entity_record(kind, name, &id.into())
    }

    pub fn get_entity_record_edits(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> Option<Map<String, Value>> {
        self.cache().get_entity_record_edits(kind, name, &id.into())
    }

    pub fn has_edits_for_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> bool {
        self.cache().has_edits_for_entity_record(kind, name, &id.into())
    }

    pub fn is_saving_entity_record(&self, kind: &str, name: &str, id: Option<RecordId>) -> bool {
        self.cache().is_saving_entity_record(kind, name, id.as_ref())
    }

    pub fn is_deleting_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> bool {
        self.cache().is_deleting_entity_record(kind, name, &id.into())
    }

    pub fn get_last_entity_save_error(&self, kind: &str, name: &str, id: Option<RecordId>) -> Option<CoreDataError> {
        self.cache().get_last_entity_save_error(kind, name, id.as_ref())
    }

    pub fn get_last_entity_delete_error(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> Option<CoreDataError> {
        self.cache().get_last_entity_delete_error(kind, name, &id.into())
    }

    pub fn get_entity_records(&self, kind: &str, name: &str, query: &Map<String, Value>) -> Option<Vec<Map<String, Value>>> {
        self.cache().get_entity_records(kind, name, query)
    }

    pub fn get_current_user(&self) -> Option<Value> {
        self.cache().get_current_user()
    }

    pub fn can_user(&self, key: &str) -> Option<bool> {
        self.cache().can_user(key)
    }

    // ========== Plain actions ==========

    pub fn receive_entity_records(
        &self,
        kind: &str,
        name: &str,
        records: Value,
        query: Option<Map<String, Value>>,
        invalidate_cache: bool,
    ) {
        self.dispatch(actions::receive_entity_records(
            kind,
            name,
            records,
            query,
            invalidate_cache,
            None,
        ));
    }

    pub fn receive_user_permission(&self, key: &str, is_allowed: bool) {
        self.dispatch(actions::receive_user_permission(key, is_allowed));
    }

    pub fn receive_autosaves(&self, post_id: impl Into<RecordId>, autosaves: Value) {
        self.dispatch(actions::receive_autosaves(post_id, autosaves));
    }

    pub fn receive_current_user(&self, current_user: Value) {
        self.dispatch(actions::receive_current_user(current_user));
    }

    // ========== Resolvers ==========

    /// Fetch one record and put it in the cache
    pub async fn fetch_entity_record(&self, kind: &str, name: &str, id: impl Into<RecordId>) -> CoreDataResult<Value> {
        let entity = self.resolve_entity(kind, name).await?;
        let id = id.into();
        let path = read_path(&entity, entity.record_path(&id), None);

        let record = self.inner.transport.request(ApiRequest::get(path)).await?;
        self.dispatch(actions::receive_entity_records(
            kind,
            name,
            record.clone(),
            None,
            false,
            None,
        ));
        Ok(record)
    }

    /// Fetch a list of records and remember them under `query`
    pub async fn fetch_entity_records(
        &self,
        kind: &str,
        name: &str,
        query: Map<String, Value>,
    ) -> CoreDataResult<Vec<Value>> {
        let entity = self.resolve_entity(kind, name).await?;
        let path = read_path(&entity, entity.base_url.clone(), Some(&query));

        let response = self.inner.transport.request(ApiRequest::get(path)).await?;
        let records = match response {
            Value::Array(records) => records,
            other => {
                return Err(CoreDataError::Transport(
                    crate::error::TransportError::InvalidResponse(format!(
                        "expected a list of {} records, got {}",
                        name, other
                    )),
                ))
            }
        };
        self.dispatch(actions::receive_entity_records(
            kind,
            name,
            Value::Array(records.clone()),
            Some(query),
            false,
            None,
        ));
        Ok(records)
    }
}

/// Read path with the entity's base params followed by the caller's query
fn read_path(entity: &EntityDescriptor, path: String, query: Option<&Map<String, Value>>) -> String {
    let mut args = entity.base_url_params.clone().unwrap_or_default();
    if let Some(query) = query {
        args.extend(query.clone());
    }
    add_query_args(&path, &args)
}
