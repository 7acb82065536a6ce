use super::{PendingFinish, SaveOptions};
use crate::entities::{EntityDescriptor, RecordId};
use crate::error::{CoreDataError, CoreDataResult};
use crate::locks::{record_lock_path, LockGuard};
use crate::store::{actions, CoreData, StoreAction};
use crate::transport::{ApiRequest, Method, Transport};
use log::{debug, warn};
use serde_json::{Map, Value};

/// Fields an autosave carries besides `status`
const AUTOSAVE_FIELDS: [&str; 3] = ["title", "excerpt", "content"];

impl CoreData {
    /// Create or update a record.
    ///
    /// The record is an update when it carries its key field and a record with
    /// that identifier is in the cache; then it is `PUT` to `base_url/{id}`.
    /// Otherwise it is `POST`ed to `base_url`. On success the server response
    /// is merged into the cache together with the payload that was sent, and
    /// returned.
    pub async fn save_entity_record(
        &self,
        kind: &str,
        name: &str,
        record: Value,
        options: SaveOptions,
    ) -> CoreDataResult<Value> {
        let entity = self.resolve_entity(kind, name).await?;
        let Value::Object(record) = record else {
            return Err(CoreDataError::InvalidRecord(format!(
                "{} {} record must be an object",
                kind, name
            )));
        };
        let record_id = entity.record_id(&record);

        let locks = options.locks.clone().unwrap_or_else(|| self.locks());
        let lock = LockGuard::acquire(locks, record_lock_path(kind, name, record_id.as_ref()), true).await?;

        self.dispatch(StoreAction::SaveEntityRecordStart {
            kind: kind.to_string(),
            name: name.to_string(),
            record_id: record_id.clone(),
            is_autosave: options.is_autosave,
        });
        let pending = {
            let (kind, name, record_id) = (kind.to_string(), name.to_string(), record_id.clone());
            let is_autosave = options.is_autosave;
            PendingFinish::new(self, move |error| StoreAction::SaveEntityRecordFinish {
                kind,
                name,
                record_id,
                error,
                is_autosave,
            })
        };

        let fetch = options.fetch.clone().unwrap_or_else(|| self.transport());
        let result = if options.is_autosave {
            self.autosave_record(&entity, record_id.as_ref(), record, fetch.as_ref())
                .await
        } else {
            self.persist_record(&entity, record_id.as_ref(), record, fetch.as_ref())
                .await
        };

        if let Err(error) = &result {
            warn!("❌ Saving {} {} {:?} failed: {}", kind, name, record_id, error);
        }
        pending.finish(result.as_ref().err().cloned());
        lock.release();

        result
    }

    /// Save the pending non-transient edits of a record.
    ///
    /// Returns `Ok(None)` without any side effect when there is nothing to save.
    pub async fn save_edited_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
        options: SaveOptions,
    ) -> CoreDataResult<Option<Value>> {
        let record_id = record_id.into();
        let entity = self.resolve_entity(kind, name).await?;

        let edits = self.select(|cache| {
            cache.get_entity_record_non_transient_edits(kind, name, &record_id)
        });
        if edits.is_empty() {
            debug!("No edits to save for {} {} {}", kind, name, record_id);
            return Ok(None);
        }

        let mut record = Map::new();
        record.insert(entity.key.clone(), record_id.to_value());
        record.extend(edits);

        self.save_entity_record(kind, name, Value::Object(record), options)
            .await
            .map(Some)
    }

    async fn persist_record(
        &self,
        entity: &EntityDescriptor,
        record_id: Option<&RecordId>,
        record: Map<String, Value>,
        fetch: &dyn Transport,
    ) -> CoreDataResult<Value> {
        let persisted = record_id
            .and_then(|id| self.get_raw_entity_record(&entity.kind, &entity.name, id.clone()));

        let request = match (record_id, persisted) {
            (Some(id), Some(_)) => ApiRequest::new(entity.record_path(id), Method::Put),
            _ => ApiRequest::new(entity.base_url.clone(), Method::Post),
        }
        .with_data(Value::Object(record.clone()));
        debug!("💾 {} {}", request.method, request.path);

        let updated = fetch.request(request).await?;
        self.dispatch(actions::receive_entity_records(
            &entity.kind,
            &entity.name,
            updated.clone(),
            None,
            true,
            Some(record),
        ));
        Ok(updated)
    }

    async fn autosave_record(
        &self,
        entity: &EntityDescriptor,
        record_id: Option<&RecordId>,
        record: Map<String, Value>,
        fetch: &dyn Transport,
    ) -> CoreDataResult<Value> {
        let id = record_id.ok_or_else(|| {
            CoreDataError::InvalidRecord("an autosave needs the record identifier".to_string())
        })?;
        let persisted = self
            .get_raw_entity_record(&entity.kind, &entity.name, id.clone())
            .ok_or_else(|| {
                CoreDataError::InvalidRecord(format!(
                    "cannot autosave {} {} {}: record is not loaded",
                    entity.kind, entity.name, id
                ))
            })?;

        let post_id = RecordId::from_value(persisted.get("id")).unwrap_or_else(|| id.clone());
        let current_user_id = self
            .get_current_user()
            .and_then(|user| RecordId::from_value(user.get("id")));
        let current_autosave = current_user_id
            .and_then(|user_id| self.select(|cache| cache.get_autosave(&post_id, &user_id)));

        let mut merged = persisted.clone();
        if let Some(Value::Object(autosave)) = current_autosave {
            merged.extend(autosave);
        }
        merged.extend(record);
        let data = autosave_payload(&merged);

        let request = ApiRequest::new(format!("{}/autosaves", entity.record_path(id)), Method::Post)
            .with_data(Value::Object(data.clone()));
        debug!("💾 {} {}", request.method, request.path);
        let updated = fetch.request(request).await?;

        if RecordId::from_value(updated.get("id")).as_ref() == Some(&post_id) {
            // draft autosaves overwrite the record itself
            let mut combined = persisted.clone();
            combined.extend(data);
            if let Value::Object(fields) = &updated {
                combined.extend(fields.clone());
            }
            self.dispatch(actions::receive_entity_records(
                &entity.kind,
                &entity.name,
                Value::Object(draft_autosave_record(&persisted, combined)),
                None,
                true,
                None,
            ));
        } else {
            self.dispatch(actions::receive_autosaves(post_id, updated.clone()));
        }

        Ok(updated)
    }
}

/// Body of an autosave request: the autosaved fields and the status, where an
/// `auto-draft` is sent as `draft`
fn autosave_payload(merged: &Map<String, Value>) -> Map<String, Value> {
    let mut data = Map::new();
    match merged.get("status") {
        Some(Value::String(status)) if status == "auto-draft" => {
            data.insert("status".to_string(), Value::from("draft"));
        }
        Some(status) if !status.is_null() => {
            data.insert("status".to_string(), status.clone());
        }
        _ => {}
    }
    for field in AUTOSAVE_FIELDS {
        if let Some(value) = merged.get(field) {
            data.insert(field.to_string(), value.clone());
        }
    }
    data
}

/// Record to store after a draft autosave: autosaved fields from the merge,
/// everything else from the persisted record, and the status only promoted
/// from `auto-draft` to `draft`
fn draft_autosave_record(persisted: &Map<String, Value>, combined: Map<String, Value>) -> Map<String, Value> {
    let persisted_status = persisted.get("status");
    let mut record = Map::new();
    for (field, value) in combined {
        if AUTOSAVE_FIELDS.contains(&field.as_str()) {
            record.insert(field, value);
        } else if field == "status" {
            let promoted = persisted_status == Some(&Value::from("auto-draft"))
                && value == Value::from("draft");
            let status = if promoted {
                Some(value)
            } else {
                persisted_status.cloned()
            };
            if let Some(status) = status {
                record.insert(field, status);
            }
        } else if let Some(persisted_value) = persisted.get(&field) {
            record.insert(field, persisted_value.clone());
        }
    }
    record
}
