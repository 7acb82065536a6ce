//! Store actions
//!
//! Every change to the record cache goes through one of these actions, and
//! every dispatched action is published on the store's action bus. Serialized
//! actions carry a `type` tag (`SAVE_ENTITY_RECORD_START`, `RECEIVE_ITEMS`, ...)
//! and camelCase fields.

use crate::entities::{EntityDescriptor, RecordId};
use crate::error::CoreDataError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum StoreAction {
    AddEntities {
        entities: Vec<EntityDescriptor>,
    },
    ReceiveItems {
        kind: String,
        name: String,
        items: Vec<Value>,
        query: Option<Map<String, Value>>,
        invalidate_cache: bool,
        /// The payload that was sent to the server, when the items are the
        /// answer to a save
        persisted_edits: Option<Map<String, Value>>,
    },
    RemoveItems {
        kind: String,
        name: String,
        item_ids: Vec<RecordId>,
        invalidate_cache: bool,
    },
    EditEntityRecord {
        kind: String,
        name: String,
        record_id: RecordId,
        /// `None` clears the edit of that field
        edits: BTreeMap<String, Option<Value>>,
        transient_edits: BTreeSet<String>,
    },
    SaveEntityRecordStart {
        kind: String,
        name: String,
        record_id: Option<RecordId>,
        is_autosave: bool,
    },
    SaveEntityRecordFinish {
        kind: String,
        name: String,
        record_id: Option<RecordId>,
        error: Option<CoreDataError>,
        is_autosave: bool,
    },
    DeleteEntityRecordStart {
        kind: String,
        name: String,
        record_id: RecordId,
    },
    DeleteEntityRecordFinish {
        kind: String,
        name: String,
        record_id: RecordId,
        error: Option<CoreDataError>,
    },
    ReceiveUserPermission {
        key: String,
        is_allowed: bool,
    },
    ReceiveAutosaves {
        post_id: RecordId,
        autosaves: Vec<Value>,
    },
    ReceiveCurrentUser {
        current_user: Value,
    },
}

impl StoreAction {
    /// The serialized `type` tag of the action
    pub fn action_type(&self) -> &'static str {
        match self {
            StoreAction::AddEntities { .. } => "ADD_ENTITIES",
            StoreAction::ReceiveItems { .. } => "RECEIVE_ITEMS",
            StoreAction::RemoveItems { .. } => "REMOVE_ITEMS",
            StoreAction::EditEntityRecord { .. } => "EDIT_ENTITY_RECORD",
            StoreAction::SaveEntityRecordStart { .. } => "SAVE_ENTITY_RECORD_START",
            StoreAction::SaveEntityRecordFinish { .. } => "SAVE_ENTITY_RECORD_FINISH",
            StoreAction::DeleteEntityRecordStart { .. } => "DELETE_ENTITY_RECORD_START",
            StoreAction::DeleteEntityRecordFinish { .. } => "DELETE_ENTITY_RECORD_FINISH",
            StoreAction::ReceiveUserPermission { .. } => "RECEIVE_USER_PERMISSION",
            StoreAction::ReceiveAutosaves { .. } => "RECEIVE_AUTOSAVES",
            StoreAction::ReceiveCurrentUser { .. } => "RECEIVE_CURRENT_USER",
        }
    }

    /// The `(kind, name)` pair the action targets, if any
    pub fn entity(&self) -> Option<(&str, &str)> {
        match self {
            StoreAction::ReceiveItems { kind, name, .. }
            | StoreAction::RemoveItems { kind, name, .. }
            | StoreAction::EditEntityRecord { kind, name, .. }
            | StoreAction::SaveEntityRecordStart { kind, name, .. }
            | StoreAction::SaveEntityRecordFinish { kind, name, .. }
            | StoreAction::DeleteEntityRecordStart { kind, name, .. }
            | StoreAction::DeleteEntityRecordFinish { kind, name, .. } => {
                Some((kind.as_str(), name.as_str()))
            }
            _ => None,
        }
    }
}

/// Build a `RECEIVE_ITEMS` action. A single record is wrapped in a list.
pub fn receive_entity_records(
    kind: &str,
    name: &str,
    records: Value,
    query: Option<Map<String, Value>>,
    invalidate_cache: bool,
    persisted_edits: Option<Map<String, Value>>,
) -> StoreAction {
    StoreAction::ReceiveItems {
        kind: kind.to_string(),
        name: name.to_string(),
        items: into_list(records),
        query,
        invalidate_cache,
        persisted_edits,
    }
}

/// Build a `REMOVE_ITEMS` action
pub fn remove_items(kind: &str, name: &str, item_ids: Vec<RecordId>, invalidate_cache: bool) -> StoreAction {
    StoreAction::RemoveItems {
        kind: kind.to_string(),
        name: name.to_string(),
        item_ids,
        invalidate_cache,
    }
}

/// Build a `RECEIVE_USER_PERMISSION` action
pub fn receive_user_permission(key: &str, is_allowed: bool) -> StoreAction {
    StoreAction::ReceiveUserPermission {
        key: key.to_string(),
        is_allowed,
    }
}

/// Build a `RECEIVE_AUTOSAVES` action. A single autosave is wrapped in a list.
pub fn receive_autosaves(post_id: impl Into<RecordId>, autosaves: Value) -> StoreAction {
    StoreAction::ReceiveAutosaves {
        post_id: post_id.into(),
        autosaves: into_list(autosaves),
    }
}

/// Build a `RECEIVE_CURRENT_USER` action
pub fn receive_current_user(current_user: Value) -> StoreAction {
    StoreAction::ReceiveCurrentUser { current_user }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}
