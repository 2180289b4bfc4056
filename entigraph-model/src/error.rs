//! Error types for the entity graph.

use entigraph_types::EntityRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// No entity type of that name was registered.
    #[error("unknown entity type: {0}")]
    UnknownType(String),

    /// The type (and its supertypes) declare no such field.
    #[error("entity type '{entity_type}' has no field '{field}'")]
    UnknownField { entity_type: String, field: String },

    /// A collection operation hit a field holding a non-list value.
    #[error("field '{field}' of '{entity_type}' does not hold a collection")]
    NotACollection { entity_type: String, field: String },

    #[error("splice index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The handle was minted by another identity context, or the instance it
    /// named has been destroyed or cleared.
    #[error("entity {0} does not belong to this context")]
    ForeignEntity(EntityRef),

    #[error("identity context holds the maximum number of instances")]
    CapacityExceeded,


    /// A persistence call was made with no store adapter configured.
    #[error("no store adapter configured for '{0}'")]
    MissingStore(String),

    /// Error reported by a store adapter.
    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Types(#[from] entigraph_types::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
