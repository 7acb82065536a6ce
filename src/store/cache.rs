//! Record cache
//!
//! Holds, per `(kind, name)`, the canonical records (last known server state),
//! the local edits of each record, the results of list queries, and the state
//! of in-flight saves and deletes. It also keeps the loaded entity config, the
//! current user, autosaves and user permissions.
//!
//! The cache only changes through [`RecordCache::reduce`].

use super::actions::StoreAction;
use crate::entities::{EntityDescriptor, RecordId, DEFAULT_ENTITY_KEY};
use crate::error::CoreDataError;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Progress of a save or delete of one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestState {
    pub pending: bool,
    pub error: Option<CoreDataError>,
    pub is_autosave: bool,
}

#[derive(Debug, Default)]
struct EntityRecords {
    records: HashMap<String, Map<String, Value>>,
    queries: HashMap<String, Vec<String>>,
    edits: HashMap<String, Map<String, Value>>,
    saving: HashMap<Option<String>, RequestState>,
    deleting: HashMap<String, RequestState>,
}

#[derive(Debug, Default)]
pub struct RecordCache {
    config: Vec<EntityDescriptor>,
    entities: HashMap<(String, String), EntityRecords>,
    current_user: Option<Value>,
    autosaves: HashMap<String, Vec<Value>>,
    user_permissions: HashMap<String, bool>,
}

/// The `raw` part of a field that the server renders (`{"raw": .., "rendered": ..}`)
fn raw_value(value: &Value) -> &Value {
    value.get("raw").unwrap_or(value)
}

/// Stable key for a list query
fn query_key(query: &Map<String, Value>) -> String {
    Value::Object(query.clone()).to_string()
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self, kind: &str, name: &str) -> Option<&EntityRecords> {
        self.entities.get(&(kind.to_string(), name.to_string()))
    }

    fn records_mut(&mut self, kind: &str, name: &str) -> &mut EntityRecords {
        self.entities
            .entry((kind.to_string(), name.to_string()))
            .or_default()
    }

    fn key_field(&self, kind: &str, name: &str) -> String {
        self.get_entity(kind, name)
            .map(|entity| entity.key.clone())
            .unwrap_or_else(|| DEFAULT_ENTITY_KEY.to_string())
    }

    /// Apply one action
    pub fn reduce(&mut self, action: &StoreAction) {
        match action {
            StoreAction::AddEntities { entities } => {
                for entity in entities {
                    match self
                        .config
                        .iter_mut()
                        .find(|known| known.matches(&entity.kind, &entity.name))
                    {
                        Some(known) => *known = entity.clone(),
                        None => self.config.push(entity.clone()),
                    }
                }
            }
            StoreAction::ReceiveItems {
                kind,
                name,
                items,
                query,
                invalidate_cache,
                persisted_edits,
            } => self.receive_items(
                kind,
                name,
                items,
                query.as_ref(),
                *invalidate_cache,
                persisted_edits.as_ref(),
            ),
            StoreAction::RemoveItems {
                kind,
                name,
                item_ids,
                invalidate_cache,
            } => {
                let records = self.records_mut(kind, name);
                let removed: Vec<String> = item_ids.iter().map(RecordId::cache_key).collect();
                for id in &removed {
                    records.records.remove(id);
                }
                if *invalidate_cache {
                    records.queries.clear();
                } else {
                    for ids in records.queries.values_mut() {
                        ids.retain(|id| !removed.contains(id));
                    }
                }
            }
            StoreAction::EditEntityRecord {
                kind,
                name,
                record_id,
                edits,
                ..
            } => self.apply_edits(kind, name, record_id, edits),
            StoreAction::SaveEntityRecordStart {
                kind,
                name,
                record_id,
                is_autosave,
            } => {
                self.records_mut(kind, name).saving.insert(
                    record_id.as_ref().map(RecordId::cache_key),
                    RequestState {
                        pending: true,
                        error: None,
                        is_autosave: *is_autosave,
                    },
                );
            }
            StoreAction::SaveEntityRecordFinish {
                kind,
                name,
                record_id,
                error,
                is_autosave,
            } => {
                self.records_mut(kind, name).saving.insert(
                    record_id.as_ref().map(RecordId::cache_key),
                    RequestState {
                        pending: false,
                        error: error.clone(),
                        is_autosave: *is_autosave,
                    },
                );
            }
            StoreAction::DeleteEntityRecordStart {
                kind,
                name,
                record_id,
            } => {
                self.records_mut(kind, name).deleting.insert(
                    record_id.cache_key(),
                    RequestState {
                        pending: true,
                        ..RequestState::default()
                    },
                );
            }
            StoreAction::DeleteEntityRecordFinish {
                kind,
                name,
                record_id,
                error,
            } => {
                self.records_mut(kind, name).deleting.insert(
                    record_id.cache_key(),
                    RequestState {
                        pending: false,
                        error: error.clone(),
                        is_autosave: false,
                    },
                );
            }
            StoreAction::ReceiveUserPermission { key, is_allowed } => {
                self.user_permissions.insert(key.clone(), *is_allowed);
            }
            StoreAction::ReceiveAutosaves { post_id, autosaves } => {
                self.autosaves.insert(post_id.cache_key(), autosaves.clone());
            }
            StoreAction::ReceiveCurrentUser { current_user } => {
                self.current_user = Some(current_user.clone());
            }
        }
    }

    fn receive_items(
        &mut self,
        kind: &str,
        name: &str,
        items: &[Value],
        query: Option<&Map<String, Value>>,
        invalidate_cache: bool,
        persisted_edits: Option<&Map<String, Value>>,
    ) {
        let key = self.key_field(kind, name);
        let records = self.records_mut(kind, name);
        if invalidate_cache {
            records.queries.clear();
        }

        let mut received_ids = Vec::with_capacity(items.len());
        for item in items {
            let Some(fields) = item.as_object() else {
                continue;
            };
            let Some(id) = RecordId::from_value(fields.get(&key)) else {
                continue;
            };
            let id = id.cache_key();

            // sent fields the server did not echo are kept; on conflict the
            // server response wins
            let mut merged = persisted_edits.cloned().unwrap_or_default();
            merged.extend(fields.iter().map(|(field, value)| (field.clone(), value.clone())));
            records.records.entry(id.clone()).or_default().extend(merged);

            if let Some(edits) = records.edits.get_mut(&id) {
                edits.retain(|field, edited| {
                    let persisted_matches = fields
                        .get(field)
                        .map(|value| raw_value(value) == edited)
                        .unwrap_or(false);
                    let sent_matches = persisted_edits
                        .and_then(|sent| sent.get(field))
                        .map(|value| value == edited)
                        .unwrap_or(false);
                    !persisted_matches && !sent_matches
                });
                if edits.is_empty() {
                    records.edits.remove(&id);
                }
            }

            received_ids.push(id);
        }

        if let Some(query) = query {
            records.queries.insert(query_key(query), received_ids);
        }
    }

    fn apply_edits(
        &mut self,
        kind: &str,
        name: &str,
        record_id: &RecordId,
        edits: &BTreeMap<String, Option<Value>>,
    ) {
        let id = record_id.cache_key();
        let records = self.records_mut(kind, name);
        let mut next = records.edits.remove(&id).unwrap_or_default();
        for (field, value) in edits {
            match value {
                Some(value) => {
                    next.insert(field.clone(), value.clone());
                }
                None => {
                    next.remove(field);
                }
            }
        }
        if !next.is_empty() {
            records.edits.insert(id, next);
        }
    }

    // ========== Selectors ==========

    pub fn get_entity(&self, kind: &str, name: &str) -> Option<&EntityDescriptor> {
        self.config.iter().find(|entity| entity.matches(kind, name))
    }

    pub fn get_entities_by_kind(&self, kind: &str) -> Vec<EntityDescriptor> {
        self.config
            .iter()
            .filter(|entity| entity.kind == kind)
            .cloned()
            .collect()
    }

    /// Canonical record as received from the server
    pub fn get_entity_record(&self, kind: &str, name: &str, id: &RecordId) -> Option<Map<String, Value>> {
        self.records(kind, name)?.records.get(&id.cache_key()).cloned()
    }

    /// Canonical record with rendered fields reduced to their `raw` value
    pub fn get_raw_entity_record(&self, kind: &str, name: &str, id: &RecordId) -> Option<Map<String, Value>> {
        let record = self.records(kind, name)?.records.get(&id.cache_key())?;
        Some(
            record
                .iter()
                .map(|(field, value)| (field.clone(), raw_value(value).clone()))
                .collect(),
        )
    }

    pub fn get_entity_record_edits(&self, kind: &str, name: &str, id: &RecordId) -> Option<Map<String, Value>> {
        self.records(kind, name)?.edits.get(&id.cache_key()).cloned()
    }

    /// Edits without the entity's transient fields
    pub fn get_entity_record_non_transient_edits(
        &self,
        kind: &str,
        name: &str,
        id: &RecordId,
    ) -> Map<String, Value> {
        let edits = self.get_entity_record_edits(kind, name, id).unwrap_or_default();
        match self.get_entity(kind, name) {
            Some(entity) => edits
                .into_iter()
                .filter(|(field, _)| !entity.is_transient(field))
                .collect(),
            None => edits,
        }
    }

    pub fn has_edits_for_entity_record(&self, kind: &str, name: &str, id: &RecordId) -> bool {
        !self
            .get_entity_record_non_transient_edits(kind, name, id)
            .is_empty()
    }

    /// Raw record overlaid with its edits
    pub fn get_edited_entity_record(&self, kind: &str, name: &str, id: &RecordId) -> Map<String, Value> {
        let mut record = self.get_raw_entity_record(kind, name, id).unwrap_or_default();
        if let Some(edits) = self.get_entity_record_edits(kind, name, id) {
            record.extend(edits);
        }
        record
    }

    /// Records of a list query, in the order the server returned them
    pub fn get_entity_records(
        &self,
        kind: &str,
        name: &str,
        query: &Map<String, Value>,
    ) -> Option<Vec<Map<String, Value>>> {
        let records = self.records(kind, name)?;
        let ids = records.queries.get(&query_key(query))?;
        Some(
            ids.iter()
                .filter_map(|id| records.records.get(id).cloned())
                .collect(),
        )
    }

    fn saving_state(&self, kind: &str, name: &str, id: Option<&RecordId>) -> Option<&RequestState> {
        self.records(kind, name)?
            .saving
            .get(&id.map(RecordId::cache_key))
    }

    fn deleting_state(&self, kind: &str, name: &str, id: &RecordId) -> Option<&RequestState> {
        self.records(kind, name)?.deleting.get(&id.cache_key())
    }

    pub fn is_saving_entity_record(&self, kind: &str, name: &str, id: Option<&RecordId>) -> bool {
        self.saving_state(kind, name, id)
            .map(|state| state.pending)
            .unwrap_or(false)
    }

    pub fn is_autosaving_entity_record(&self, kind: &str, name: &str, id: Option<&RecordId>) -> bool {
        self.saving_state(kind, name, id)
            .map(|state| state.pending && state.is_autosave)
            .unwrap_or(false)
    }

    pub fn is_deleting_entity_record(&self, kind: &str, name: &str, id: &RecordId) -> bool {
        self.deleting_state(kind, name, id)
            .map(|state| state.pending)
            .unwrap_or(false)
    }

    pub fn get_last_entity_save_error(&self, kind: &str, name: &str, id: Option<&RecordId>) -> Option<CoreDataError> {
        self.saving_state(kind, name, id)?.error.clone()
    }

    pub fn get_last_entity_delete_error(&self, kind: &str, name: &str, id: &RecordId) -> Option<CoreDataError> {
        self.deleting_state(kind, name, id)?.error.clone()
    }

    pub fn get_current_user(&self) -> Option<Value> {
        self.current_user.clone()
    }

    pub fn get_autosaves(&self, post_id: &RecordId) -> Option<Vec<Value>> {
        self.autosaves.get(&post_id.cache_key()).cloned()
    }

    /// The autosave of `post_id` written by `author_id`
    pub fn get_autosave(&self, post_id: &RecordId, author_id: &RecordId) -> Option<Value> {
        self.autosaves
            .get(&post_id.cache_key())?
            .iter()
            .find(|autosave| RecordId::from_value(autosave.get("author")).as_ref() == Some(author_id))
            .cloned()
    }

    pub fn can_user(&self, key: &str) -> Option<bool> {
        self.user_permissions.get(key).copied()
    }
}
