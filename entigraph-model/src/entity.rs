//! Instance-level operations: assignment, dirty tracking, removal and the
//! mapping shortcuts, plus a borrowed read view of one instance.

use crate::error::{ModelError, ModelResult};
use crate::mapper::{self, DeserializeOptions, SerializeOptions};
use crate::{Association, EntityManager};
use entigraph_types::{EntityRef, Identifier, Identity, Value};
use std::rc::Rc;
use tracing::debug;

/// Read-only view of one instance.
///
/// Borrowing the manager keeps the view consistent: nothing can write while
/// it is alive. Use the manager directly to mutate.
#[derive(Debug, Clone, Copy)]
pub struct Entity<'m> {
    manager: &'m EntityManager,
    entity: EntityRef,
}

impl<'m> Entity<'m> {
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        self.entity
    }

    #[must_use]
    pub fn type_name(&self) -> &'m str {
        self.manager.type_name(self.entity).unwrap_or_default()
    }

    #[must_use]
    pub fn identifier(&self) -> Option<Identifier> {
        self.manager.identifier(self.entity)
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.manager.identity(self.entity)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.manager.get(self.entity, name)
    }

    /// A related instance held by a singular field.
    #[must_use]
    pub fn related(&self, name: &str) -> Option<Entity<'m>> {
        let e = self.manager.value_ref(self.entity, name)?.as_entity()?;
        Some(self.manager.entity(e))
    }

    /// Instances held by a collection field.
    #[must_use]
    pub fn related_all(&self, name: &str) -> Vec<Entity<'m>> {
        self.manager
            .get(self.entity, name)
            .entities()
            .into_iter()
            .map(|e| self.manager.entity(e))
            .collect()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.manager.is_dirty(self.entity)
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.manager.is_removed(self.entity)
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.manager.is_attached(self.entity)
    }

    #[must_use]
    pub fn associations(&self) -> Vec<Rc<Association>> {
        self.manager.associations(self.entity)
    }

    #[must_use]
    pub fn serialize(&self, options: &SerializeOptions) -> serde_json::Value {
        self.manager.serialize(self.entity, options)
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.manager.to_json(self.entity)
    }
}

impl EntityManager {
    /// Read view of an instance.
    #[must_use]
    pub fn entity(&self, e: EntityRef) -> Entity<'_> {
        Entity {
            manager: self,
            entity: e,
        }
    }

    /// Assigns a declared field through [`put`](Self::put), or stores an
    /// undeclared name as a plain property.
    pub fn set(&mut self, e: EntityRef, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        if self.has_field(e, name) {
            self.put(e, name, value)
        } else {
            self.set_property(e, name, value)
        }
    }

    /// True if any field of the instance is dirty.
    #[must_use]
    pub fn is_dirty(&self, e: EntityRef) -> bool {
        self.record(e)
            .is_ok_and(|r| r.fields.values().any(|own| own.dirty))
    }

    /// Sets the dirty flag of one field, or of every field.
    pub fn set_dirty(&mut self, e: EntityRef, dirty: bool, field: Option<&str>) -> ModelResult<()> {
        let record = self.record_mut(e)?;
        match field {
            Some(name) => {
                let type_name = record.type_name.clone();
                let own = record
                    .fields
                    .get_mut(name)
                    .ok_or_else(|| ModelError::UnknownField {
                        entity_type: type_name,
                        field: name.to_string(),
                    })?;
                own.dirty = dirty;
            }
            None => {
                for own in record.fields.values_mut() {
                    own.dirty = dirty;
                }
            }
        }
        Ok(())
    }

    /// Only the fields currently marked dirty.
    #[must_use]
    pub fn dirty_fields(&self, e: EntityRef) -> Vec<String> {
        let Ok(record) = self.record(e) else {
            return Vec::new();
        };
        let mut names: Vec<String> = record
            .fields
            .iter()
            .filter(|(_, own)| own.dirty)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// True if every field passes its validator.
    #[must_use]
    pub fn is_valid(&self, e: EntityRef) -> bool {
        self.record(e)
            .is_ok_and(|r| r.fields.values().all(|own| own.meta.validate(&own.value)))
    }

    /// Unlinks the instance from every related instance, then marks it
    /// removed. The instance stays attached so the removal can be persisted.
    pub fn remove(&mut self, e: EntityRef) -> ModelResult<()> {
        self.record(e)?;
        for association in self.associations(e) {
            association.remove(self, e)?;
        }
        self.record_mut(e)?.removed = true;
        debug!("Removed entity {}", e);
        Ok(())
    }

    #[must_use]
    pub fn is_removed(&self, e: EntityRef) -> bool {
        self.record(e).is_ok_and(|r| r.removed)
    }

    /// Detaches the instance, disposes its fields and association bindings
    /// and frees its slot. Every subscription to one of its topics is
    /// released. The handle goes stale: reads yield nothing, writes fail
    /// with [`ModelError::ForeignEntity`] and destroying it again is a no-op.
    pub fn destroy(&mut self, e: EntityRef) -> ModelResult<()> {
        if self.is_stale(e) {
            return Ok(());
        }
        self.record(e)?;
        self.detach(e);
        self.unbind_associations(e)?;
        let record = self.release(e)?;
        for own in record.fields.into_values() {
            for id in own.subscriptions {
                self.streams.unsubscribe(id);
            }
        }
        let released = self.streams.unsubscribe_entity(e);
        debug!("Destroyed entity {} ({} subscriptions released)", e, released);
        Ok(())
    }

    /// True once the instance has been destroyed or cleared.
    #[must_use]
    pub fn is_destroyed(&self, e: EntityRef) -> bool {
        self.is_stale(e)
    }

    /// Deserializes `data` into the instance and leaves it clean.
    pub fn merge(&mut self, e: EntityRef, data: &serde_json::Value) -> ModelResult<EntityRef> {
        mapper::from_plain(self, data, e, &DeserializeOptions::default())?;
        self.set_dirty(e, false, None)?;
        Ok(e)
    }

    /// Deserializes `data` into the instance. Written fields become dirty.
    pub fn deserialize(
        &mut self,
        e: EntityRef,
        data: &serde_json::Value,
        options: &DeserializeOptions,
    ) -> ModelResult<EntityRef> {
        mapper::from_plain(self, data, e, options)
    }

    #[must_use]
    pub fn serialize(&self, e: EntityRef, options: &SerializeOptions) -> serde_json::Value {
        mapper::to_plain(self, e, options)
    }

    /// Serializes at the type's declared depth (1 unless configured).
    #[must_use]
    pub fn to_json(&self, e: EntityRef) -> serde_json::Value {
        let depth = self
            .type_name(e)
            .and_then(|t| self.registry().get(t))
            .map_or(1, |t| t.serialize_depth);
        mapper::to_plain(self, e, &SerializeOptions::depth(depth))
    }
}
