//! Persistence boundary.
//!
//! The graph itself never touches storage. A [`StoreAdapter`] plugged into
//! the manager fetches plain data, which is merged into the identity context
//! like any other input, and receives plain data to persist.

use crate::error::{ModelError, ModelResult};
use crate::EntityManager;
use async_trait::async_trait;
use entigraph_types::{EntityRef, Identifier};
use std::rc::Rc;
use tracing::debug;

/// Storage backend for one or more entity types.
///
/// The manager is single-threaded, so adapters are too: futures need not be
/// `Send`.
#[async_trait(?Send)]
pub trait StoreAdapter {
    /// Loads the plain data of one instance.
    async fn fetch(&self, type_name: &str, id: &Identifier) -> ModelResult<serde_json::Value>;

    /// True if the store holds an instance with this identifier.
    async fn exists(&self, type_name: &str, id: &Identifier) -> ModelResult<bool> {
        Ok(self.fetch(type_name, id).await.is_ok())
    }

    /// Persists plain data and returns what the store made of it (for
    /// example with a generated identifier).
    async fn put(&self, type_name: &str, data: serde_json::Value) -> ModelResult<serde_json::Value> {
        let _ = data;
        Err(ModelError::Store(format!("{type_name} is read-only")))
    }

    /// Deletes one instance. Returns false if it was not stored.
    async fn remove(&self, type_name: &str, id: &Identifier) -> ModelResult<bool> {
        let _ = id;
        Err(ModelError::Store(format!("{type_name} is read-only")))
    }
}

impl EntityManager {
    pub fn set_store(&mut self, store: Rc<dyn StoreAdapter>) {
        self.store = Some(store);
    }

    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    fn require_store(&self, type_name: &str) -> ModelResult<Rc<dyn StoreAdapter>> {
        self.store
            .clone()
            .ok_or_else(|| ModelError::MissingStore(type_name.to_string()))
    }

    /// Loads an instance from the store into the context.
    ///
    /// The attached instance with this identity is reused (or created) and
    /// the fetched data merged into it; the result is clean.
    pub async fn fetch(&mut self, type_name: &str, id: impl Into<Identifier>) -> ModelResult<EntityRef> {
        let id = id.into();
        let store = self.require_store(type_name)?;
        let data = store.fetch(type_name, &id).await?;
        let e = self.create(type_name, &serde_json::Value::String(id.to_string()))?;
        self.merge(e, &data)?;
        debug!("Fetched entity {} ({}:{})", e, type_name, id);
        Ok(e)
    }

    /// Writes an instance at its type's serialization depth and merges the
    /// store's answer back. The instance ends up clean.
    pub async fn save(&mut self, e: EntityRef) -> ModelResult<EntityRef> {
        let type_name = self
            .type_name(e)
            .ok_or(ModelError::ForeignEntity(e))?
            .to_string();
        let store = self.require_store(&type_name)?;
        let stored = store.put(&type_name, self.to_json(e)).await?;
        self.merge(e, &stored)?;
        debug!("Saved entity {} (type={})", e, type_name);
        Ok(e)
    }

    /// Removes an instance locally and deletes it from the store. Anonymous
    /// instances were never stored and are only removed locally.
    pub async fn delete(&mut self, e: EntityRef) -> ModelResult<bool> {
        let type_name = self
            .type_name(e)
            .ok_or(ModelError::ForeignEntity(e))?
            .to_string();
        let store = self.require_store(&type_name)?;
        self.remove(e)?;
        let Some(id) = self.identifier(e) else {
            return Ok(false);
        };
        let deleted = store.remove(&type_name, &id).await?;
        self.detach(e);
        debug!("Deleted entity {} ({}:{})", e, type_name, id);
        Ok(deleted)
    }
}
