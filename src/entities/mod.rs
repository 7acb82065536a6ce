//! # Entity Registry
//!
//! Entities map a `(kind, name)` pair to a REST resource. The descriptor tells
//! the data layer where the resource lives (`base_url`), which field of a record
//! is its primary key (`key`, `"id"` unless stated otherwise) and how local edits
//! of its records behave (`transient_edits`, `merged_edits`).
//!
//! Descriptors for the `root` kind are known up front ([`default_entities`]).
//! Other kinds (`postType`, `taxonomy`) are discovered from the REST API the
//! first time they are needed, see [`KindLoader`].

pub mod defaults;

pub use defaults::{default_entities, KindLoader};

use crate::transport::encode_uri_component;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Primary key field used when a descriptor does not name one
pub const DEFAULT_ENTITY_KEY: &str = "id";

fn default_key() -> String {
    DEFAULT_ENTITY_KEY.to_string()
}

/// Identifier of a record, as found in its key field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Read an identifier from a field value.
    ///
    /// Missing, `null`, `false` and empty-string values mean "no identifier".
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        match value? {
            Value::Number(number) => Some(
                number
                    .as_i64()
                    .map(RecordId::Int)
                    .unwrap_or_else(|| RecordId::Str(number.to_string())),
            ),
            Value::String(text) if !text.is_empty() => Some(RecordId::Str(text.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(id) => Value::from(*id),
            RecordId::Str(id) => Value::from(id.as_str()),
        }
    }

    /// Key used by the record cache. `10` and `"10"` address the same record.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        RecordId::Int(i64::from(id))
    }
}

impl From<u32> for RecordId {
    fn from(id: u32) -> Self {
        RecordId::Int(i64::from(id))
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Str(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Str(id)
    }
}

/// REST resource descriptor for one `(kind, name)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub kind: String,
    pub name: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    /// Query arguments added to reads of this entity (e.g. `context=edit`)
    #[serde(
        rename = "baseURLParams",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url_params: Option<Map<String, Value>>,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Fields whose edits never make a record dirty and are never saved
    #[serde(default)]
    pub transient_edits: BTreeSet<String>,
    /// Object fields whose edits are merged into the edited value
    #[serde(default)]
    pub merged_edits: BTreeSet<String>,
}

impl EntityDescriptor {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            base_url: base_url.into(),
            base_url_params: None,
            key: default_key(),
            label: None,
            plural: None,
            transient_edits: BTreeSet::new(),
            merged_edits: BTreeSet::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// Use `context=edit` for reads, which is what editing needs
    pub fn with_edit_context(mut self) -> Self {
        let mut params = Map::new();
        params.insert("context".to_string(), Value::from("edit"));
        self.base_url_params = Some(params);
        self
    }

    pub fn with_transient_edits(mut self, fields: &[&str]) -> Self {
        self.transient_edits = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    pub fn with_merged_edits(mut self, fields: &[&str]) -> Self {
        self.merged_edits = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    /// Identifier of `record` according to this descriptor's key field
    pub fn record_id(&self, record: &Map<String, Value>) -> Option<RecordId> {
        RecordId::from_value(record.get(&self.key))
    }

    /// `base_url/{id}` with the identifier percent-encoded
    pub fn record_path(&self, id: &RecordId) -> String {
        format!("{}/{}", self.base_url, encode_uri_component(&id.to_string()))
    }

    pub fn is_transient(&self, field: &str) -> bool {
        self.transient_edits.contains(field)
    }

    pub fn matches(&self, kind: &str, name: &str) -> bool {
        self.kind == kind && self.name == name
    }
}
