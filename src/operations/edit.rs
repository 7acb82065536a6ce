use crate::entities::RecordId;
use crate::error::{CoreDataError, CoreDataResult};
use crate::store::{CoreData, StoreAction};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

impl CoreData {
    /// Record local edits for a record.
    ///
    /// The entity must already be loaded. Edits to the entity's merged fields
    /// are merged into the current edited value; an edit equal to the
    /// persisted value clears the pending edit of that field.
    pub fn edit_entity_record(
        &self,
        kind: &str,
        name: &str,
        record_id: impl Into<RecordId>,
        edits: Value,
    ) -> CoreDataResult<()> {
        let entity = self
            .get_entity(kind, name)
            .ok_or_else(|| CoreDataError::EntityConfigNotLoaded {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;
        let Value::Object(edits) = edits else {
            return Err(CoreDataError::InvalidRecord(format!(
                "edits to {} {} must be an object",
                kind, name
            )));
        };
        let record_id = record_id.into();

        let (persisted, edited) = self.select(|cache| {
            (
                cache
                    .get_raw_entity_record(kind, name, &record_id)
                    .unwrap_or_default(),
                cache.get_edited_entity_record(kind, name, &record_id),
            )
        });

        let mut resolved = BTreeMap::new();
        for (field, value) in edits {
            let value = if entity.merged_edits.contains(&field) {
                merge_edit(edited.get(&field), value)
            } else {
                value
            };
            let edit = if persisted.get(&field) == Some(&value) {
                None
            } else {
                Some(value)
            };
            resolved.insert(field, edit);
        }

        self.dispatch(StoreAction::EditEntityRecord {
            kind: kind.to_string(),
            name: name.to_string(),
            record_id,
            edits: resolved,
            transient_edits: entity.transient_edits,
        });
        Ok(())
    }
}

/// Shallow merge of an object edit into the current edited value
fn merge_edit(current: Option<&Value>, edit: Value) -> Value {
    match (current, edit) {
        (Some(Value::Object(current)), Value::Object(edit)) => {
            let mut merged: Map<String, Value> = current.clone();
            merged.extend(edit);
            Value::Object(merged)
        }
        (_, edit) => edit,
    }
}
