//! Identifier types used throughout entigraph.
//!
//! Identity contexts are named by UUID v7 so handles from different contexts
//! never compare equal. Entity identifiers are canonicalized to strings so
//! that `1` and `"1"` denote the same identity.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of an identity context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a new context ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a context ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContextId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Handle to one live instance owned by one identity context.
///
/// Two handles are equal exactly when they name the same instance, which
/// makes `==` on handles the equivalent of reference identity. Arena slots
/// are reused once their instance is destroyed; the generation tells a
/// handle to the old occupant apart from one to the new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    context: ContextId,
    index: u32,
    generation: u32,
}

impl EntityRef {
    /// A handle to the first occupant of a slot.
    #[must_use]
    pub const fn new(context: ContextId, index: u32) -> Self {
        Self::with_generation(context, index, 0)
    }

    #[must_use]
    pub const fn with_generation(context: ContextId, index: u32, generation: u32) -> Self {
        Self {
            context,
            index,
            generation,
        }
    }

    /// The context whose arena holds this instance.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Slot of this instance in its context's arena.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// How many earlier occupants the slot had.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}v{}", self.index, self.generation)
        }
    }
}

/// Canonical (stringified) entity identifier.
///
/// Any non-null scalar converts into an identifier. The empty string does
/// not: an entity whose identifier field holds `""` or `null` is anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Returns `None` for the empty string, which marks anonymity.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() { None } else { Some(Self(id)) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical form of a numeric identifier. Integral floats render like
    /// the integer they equal, so `1`, `1.0` and `"1"` are one identity.
    #[must_use]
    pub fn from_number(n: &serde_json::Number) -> Self {
        // Integers of at most 2^53 convert to f64 and back exactly.
        const EXACT: f64 = 9_007_199_254_740_992.0;
        match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= EXACT => {
                Self((f as i64).to_string())
            }
            _ => Self(n.to_string()),
        }
    }

    /// Canonicalizes a plain JSON identifier. Objects and arrays have no
    /// identifier of their own.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Self::new(s.as_str()),
            serde_json::Value::Number(n) => Some(Self::from_number(n)),
            serde_json::Value::Bool(b) => Self::new(b.to_string()),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&serde_json::Value> for Identifier {
    type Error = Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json(value).ok_or_else(|| Error::InvalidIdentifier(value.to_string()))
    }
}

impl From<&str> for Identifier {
    /// The empty string is kept verbatim here; lookups with it never match.
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for Identifier {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

macro_rules! identifier_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Identifier {
                fn from(n: $t) -> Self {
                    Self(n.to_string())
                }
            }
        )*
    };
}

identifier_from_int!(i32, i64, u32, u64, usize);

/// The pair (type name, identifier) deciding instance uniqueness inside a
/// context. Anonymous instances carry no identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub type_name: String,
    pub id: Option<Identifier>,
}

impl Identity {
    pub fn new(type_name: impl Into<String>, id: Option<Identifier>) -> Self {
        Self {
            type_name: type_name.into(),
            id,
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.type_name, id),
            None => write!(f, "{}:<anonymous>", self.type_name),
        }
    }
}
