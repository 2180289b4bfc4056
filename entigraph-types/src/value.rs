use crate::{EntityRef, Identifier};
use serde::Serialize;

/// The content of a field slot.
///
/// Plain data (scalars and JSON objects) is held by value. Related entities
/// are held by handle, so a `Value` never owns another entity. Equality is
/// structural; for entity references that coincides with instance identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// A plain (non-entity) JSON object.
    Object(serde_json::Map<String, serde_json::Value>),
    Entity(EntityRef),
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    #[must_use]
    pub const fn as_entity(&self) -> Option<EntityRef> {
        match self {
            Self::Entity(e) => Some(*e),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Canonical identifier if this value is usable as one.
    #[must_use]
    pub fn identifier(&self) -> Option<Identifier> {
        match self {
            Self::String(s) => Identifier::new(s.as_str()),
            Self::Number(n) => Some(Identifier::from_number(n)),
            Self::Bool(b) => Identifier::new(b.to_string()),
            Self::Null | Self::Object(_) | Self::Entity(_) | Self::List(_) => None,
        }
    }

    /// Entity handles held by this value: the handle itself for a singular
    /// reference, every entity element for a list, nothing otherwise.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityRef> {
        match self {
            Self::Entity(e) => vec![*e],
            Self::List(items) => items.iter().filter_map(Self::as_entity).collect(),
            _ => Vec::new(),
        }
    }

    /// True if `entity` is this reference or an element of this list.
    #[must_use]
    pub fn references(&self, entity: EntityRef) -> bool {
        match self {
            Self::Entity(e) => *e == entity,
            Self::List(items) => items.iter().any(|v| *v == Self::Entity(entity)),
            _ => false,
        }
    }

    /// Converts plain JSON. The result never contains entity references.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(map),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Self::Entity(e)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite numbers have no JSON representation and become `Null`.
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<EntityRef>> for Value {
    fn from(items: Vec<EntityRef>) -> Self {
        Self::List(items.into_iter().map(Self::Entity).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
