//! Change records emitted on field and collection mutations.
//!
//! The serialized shape is fixed:
//! `{type: "update"|"splice", object, name?, oldValue?, index?, addedCount?, removed?}`.
//! An `update` record describes a wholesale reassignment of a field; a
//! `splice` record describes elements inserted into or removed from a
//! collection held by a field.

use crate::{EntityRef, Value};
use serde::{Deserialize, Serialize};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Update,
    Splice,
}

/// One change to one field of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// The entity owning the changed field (or collection).
    pub object: EntityRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<Value>>,
}

impl ChangeRecord {
    /// A reassignment of `name` on `object`.
    pub fn update(object: EntityRef, name: impl Into<String>, old_value: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            object,
            name: Some(name.into()),
            old_value: Some(old_value),
            index: None,
            added_count: None,
            removed: None,
        }
    }

    /// `added_count` elements inserted at `index` after `removed` were taken
    /// out at the same position of the collection held by `name`.
    pub fn splice(
        object: EntityRef,
        name: impl Into<String>,
        index: usize,
        added_count: usize,
        removed: Vec<Value>,
    ) -> Self {
        Self {
            kind: ChangeKind::Splice,
            object,
            name: Some(name.into()),
            old_value: None,
            index: Some(index),
            added_count: Some(added_count),
            removed: Some(removed),
        }
    }

    #[must_use]
    pub fn is_update(&self) -> bool {
        self.kind == ChangeKind::Update
    }

    #[must_use]
    pub fn is_splice(&self) -> bool {
        self.kind == ChangeKind::Splice
    }

    /// The field name, or `""` for records without one.
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}
