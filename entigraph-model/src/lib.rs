//! Identity-mapped entity graph for entigraph.
//!
//! Entity types are declared up front in a [`TypeRegistry`]. An
//! [`EntityManager`] (the identity context) then owns every instance and
//! keeps the graph consistent:
//! - [`EntityManager::create`] returns the one attached instance per
//!   (type, identifier), merging new data into an existing instance
//! - fields track dirtiness, run setters and recompute computed fields when
//!   their dependencies change
//! - [`Association`]s derived from `related` + `inverse` declarations keep
//!   both sides of a link in sync on every assignment and collection splice
//! - the [`mapper`] converts instances to and from plain JSON with aliases,
//!   scenario-based ignores, formatters, parsers and a depth bound that
//!   makes cyclic graphs safe to serialize
//! - every mutation publishes a [`ChangeRecord`] to subscribers
//!
//! Persistence is pluggable through [`StoreAdapter`].

mod association;
mod config;
mod entity;
mod error;
mod field;
mod manager;
pub mod mapper;
mod schema;
mod store;
mod stream;

pub use association::{Association, AssociationNode, Cardinality};
pub use config::ModelConfig;
pub use entity::Entity;
pub use error::{ModelError, ModelResult};
pub use field::FieldHandle;
pub use manager::{EntityManager, ModifiedEntities};
pub use mapper::{DeserializeOptions, SERIALIZE_DEPTH_MAXIMUM, SerializeOptions};
pub use schema::{
    DefaultValue, EntityType, Field, Formatter, Getter, Ignore, Parser, Setter, TypeRegistry,
    Validator, ValueKind,
};
pub use store::StoreAdapter;
pub use stream::{ChangeCallback, SubscriptionId, Topic, ValueCallback};

pub use entigraph_types::{ChangeKind, ChangeRecord, ContextId, EntityRef, Identifier, Identity, Value};
