//! Core type definitions for entigraph.
//!
//! This crate defines the leaf types every other entigraph crate depends on:
//! - [`Value`]: the content of a field slot (scalars, plain JSON, entity
//!   references and lists)
//! - [`Identifier`] / [`Identity`]: canonicalized identifiers and the
//!   (type, identifier) pair that decides instance uniqueness
//! - [`EntityRef`] / [`ContextId`]: handles naming one live instance inside
//!   one identity context
//! - [`ChangeRecord`]: the change notification emitted on every field or
//!   collection mutation
//!
//! Nothing here knows about metadata, associations or mapping rules; those
//! live in `entigraph-model`.

mod change;
mod ids;
mod value;

pub use change::{ChangeKind, ChangeRecord};
pub use ids::{ContextId, EntityRef, Identifier, Identity};
pub use value::Value;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
