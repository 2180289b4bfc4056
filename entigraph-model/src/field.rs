//! Per-instance field state and the write path every mutation goes through.

use crate::error::{ModelError, ModelResult};
use crate::mapper;
use crate::schema::Field;
use crate::stream::{Listener, SubscriptionId, Topic};
use crate::EntityManager;
use entigraph_types::{ChangeRecord, EntityRef, Value};
use std::rc::Rc;
use tracing::{debug, warn};

/// State of one declared field on one instance.
#[derive(Debug)]
pub(crate) struct OwnField {
    pub(crate) meta: Rc<Field>,
    pub(crate) value: Value,
    pub(crate) dirty: bool,
    /// Set while a write to this field is being applied and announced.
    pub(crate) in_flight: bool,
    /// Dependency subscriptions of a computed field.
    pub(crate) subscriptions: Vec<SubscriptionId>,
}

/// Accessor for one field of one instance.
///
/// Obtained from [`EntityManager::field`]. It holds no borrow, so it can be
/// kept across writes; every call goes through the manager.
#[derive(Debug, Clone)]
pub struct FieldHandle {
    entity: EntityRef,
    meta: Rc<Field>,
}

impl FieldHandle {
    #[must_use]
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[must_use]
    pub fn meta(&self) -> &Field {
        &self.meta
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.meta.has_flag(flag)
    }

    #[must_use]
    pub fn get(&self, manager: &EntityManager) -> Value {
        manager.get(self.entity, &self.meta.name)
    }

    pub fn put(&self, manager: &mut EntityManager, value: impl Into<Value>) -> ModelResult<()> {
        manager.put(self.entity, &self.meta.name, value)
    }

    #[must_use]
    pub fn is_dirty(&self, manager: &EntityManager) -> bool {
        manager.is_field_dirty(self.entity, &self.meta.name)
    }

    pub fn set_dirty(&self, manager: &mut EntityManager, dirty: bool) -> ModelResult<()> {
        manager.set_dirty(self.entity, dirty, Some(&self.meta.name))
    }

    #[must_use]
    pub fn is_valid(&self, manager: &EntityManager) -> bool {
        self.meta.validate(&self.get(manager))
    }

    pub fn recompute(&self, manager: &mut EntityManager) -> ModelResult<()> {
        manager.recompute(self.entity, &self.meta.name)
    }

    pub fn subscribe<F>(&self, manager: &mut EntityManager, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &ChangeRecord) + 'static,
    {
        manager.subscribe(self.entity, &self.meta.name, callback)
    }

    pub fn subscribe_values<F>(&self, manager: &mut EntityManager, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &Value) + 'static,
    {
        manager.subscribe_values(self.entity, &self.meta.name, callback)
    }
}

impl EntityManager {
    /// Creates the field state with its default (or computed) value and
    /// wires up dependency recomputation.
    pub(crate) fn init_own_field(&mut self, e: EntityRef, meta: Rc<Field>) -> ModelResult<()> {
        let name = meta.name.clone();
        let initial = meta.initial_value();
        self.record_mut(e)?.fields.insert(
            name.clone(),
            OwnField {
                meta: meta.clone(),
                value: initial,
                dirty: false,
                in_flight: false,
                subscriptions: Vec::new(),
            },
        );

        if let Some(getter) = meta.getter.clone() {
            let computed = getter(self, e);
            if let Some(own) = self.record_mut(e)?.fields.get_mut(&name) {
                own.value = computed;
            }
        }

        let subscriptions: Vec<SubscriptionId> = meta
            .depends_on
            .iter()
            .map(|dep| {
                self.streams.subscribe(
                    Topic::Values(e, dep.clone()),
                    Listener::Recompute {
                        owner: e,
                        field: name.clone(),
                    },
                )
            })
            .collect();
        if let Some(own) = self.record_mut(e)?.fields.get_mut(&name) {
            own.subscriptions = subscriptions;
        }
        Ok(())
    }

    /// Materializes the field state on first access.
    fn ensure_own_field(&mut self, e: EntityRef, name: &str) -> ModelResult<()> {
        let record = self.record_mut(e)?;
        if record.fields.contains_key(name) {
            return Ok(());
        }
        let type_name = record.type_name.clone();
        let meta = self
            .registry()
            .field(&type_name, name)
            .ok_or_else(|| ModelError::UnknownField {
                entity_type: type_name.clone(),
                field: name.to_string(),
            })?;
        self.init_own_field(e, meta)
    }

    fn own_field(&self, e: EntityRef, name: &str) -> ModelResult<&OwnField> {
        let record = self.record(e)?;
        record
            .fields
            .get(name)
            .ok_or_else(|| ModelError::UnknownField {
                entity_type: record.type_name.clone(),
                field: name.to_string(),
            })
    }

    fn own_field_mut(&mut self, e: EntityRef, name: &str) -> ModelResult<&mut OwnField> {
        let record = self.record_mut(e)?;
        let type_name = record.type_name.clone();
        record
            .fields
            .get_mut(name)
            .ok_or(ModelError::UnknownField {
                entity_type: type_name,
                field: name.to_string(),
            })
    }

    /// True if the instance's type declares `name`.
    #[must_use]
    pub fn has_field(&self, e: EntityRef, name: &str) -> bool {
        self.type_name(e)
            .is_some_and(|t| self.registry().field(t, name).is_some())
    }

    /// Current value of a field or plain property; `Null` if there is none.
    #[must_use]
    pub fn get(&self, e: EntityRef, name: &str) -> Value {
        self.value_ref(e, name).cloned().unwrap_or_default()
    }

    /// Borrowing variant of [`get`](Self::get).
    #[must_use]
    pub fn value_ref(&self, e: EntityRef, name: &str) -> Option<&Value> {
        let record = self.record(e).ok()?;
        record
            .fields
            .get(name)
            .map(|own| &own.value)
            .or_else(|| record.properties.get(name))
    }

    /// Accessor for a declared field, materializing its state if needed.
    pub fn field(&mut self, e: EntityRef, name: &str) -> ModelResult<FieldHandle> {
        self.ensure_own_field(e, name)?;
        Ok(FieldHandle {
            entity: e,
            meta: self.own_field(e, name)?.meta.clone(),
        })
    }

    #[must_use]
    pub fn is_field_dirty(&self, e: EntityRef, name: &str) -> bool {
        self.own_field(e, name).is_ok_and(|own| own.dirty)
    }

    /// Assigns a field.
    ///
    /// Equal values are a no-op. The setter, if any, may replace the value
    /// being stored. The field is marked dirty, its value stream is fed and
    /// one `update` record is published. A write that arrives while the same
    /// field is still being written is discarded with a warning.
    pub fn put(&mut self, e: EntityRef, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let value = value.into();
        self.ensure_own_field(e, name)?;
        let own = self.own_field(e, name)?;
        if own.value == value {
            return Ok(());
        }
        if own.in_flight {
            warn!(
                "Write to {}.{} discarded: the field is already being written. \
                 A setter should return the value to store instead of writing its own field",
                e, name
            );
            return Ok(());
        }
        let meta = own.meta.clone();
        let old = own.value.clone();

        self.own_field_mut(e, name)?.in_flight = true;
        let outcome = self.write_through(e, &meta, old, value);
        if let Ok(own) = self.own_field_mut(e, name) {
            own.in_flight = false;
        }
        outcome
    }

    fn write_through(
        &mut self,
        e: EntityRef,
        meta: &Field,
        old: Value,
        mut value: Value,
    ) -> ModelResult<()> {
        if let Some(setter) = meta.setter.clone()
            && let Some(replacement) = setter(self, e, &value)
        {
            value = replacement;
        }
        if meta.is_entity_set()
            && let Value::List(items) = &mut value
        {
            let mut seen: Vec<Value> = Vec::with_capacity(items.len());
            items.retain(|item| {
                if seen.contains(item) {
                    false
                } else {
                    seen.push(item.clone());
                    true
                }
            });
        }
        if old == value {
            return Ok(());
        }
        self.store_value(e, &meta.name, value.clone())?;
        self.emit_value(e, &meta.name, &value);
        self.notify(&ChangeRecord::update(e, meta.name.as_str(), old));
        Ok(())
    }

    /// Stores a value and marks the field dirty. Writing the identifier field
    /// of an attached instance re-keys it in the identity map.
    fn store_value(&mut self, e: EntityRef, name: &str, value: Value) -> ModelResult<()> {
        let is_id = self
            .type_name(e)
            .and_then(|t| self.registry().id_field(t))
            .is_some_and(|id| id == name);
        let rekey = is_id && self.is_attached(e);
        if rekey {
            self.detach(e);
        }
        let own = self.own_field_mut(e, name)?;
        own.value = value;
        own.dirty = true;
        if rekey && self.attach(e) {
            debug!("Re-keyed entity {} as {:?}", e, self.identifier(e));
        }
        Ok(())
    }

    /// Re-evaluates a computed field and assigns the result. Skipped while
    /// the field itself is being written.
    pub(crate) fn recompute(&mut self, e: EntityRef, name: &str) -> ModelResult<()> {
        let Some(own) = self.record(e)?.fields.get(name) else {
            return Ok(());
        };
        if own.in_flight {
            debug!("Skipping recompute of {}.{} during its own write", e, name);
            return Ok(());
        }
        let Some(getter) = own.meta.getter.clone() else {
            return Ok(());
        };
        let value = getter(self, e);
        self.put(e, name, value)
    }

    // ── Collections ─────────────────────────────────────────────────

    /// Removes `delete_count` elements at `index` and inserts `items` there,
    /// publishing one `splice` record. Returns the removed elements.
    ///
    /// A `Null` field counts as an empty collection. For collections of
    /// related entities, non-entity items are resolved through
    /// [`create`](Self::create) and elements already present are not
    /// inserted twice. Splicing does not mark the field dirty.
    pub fn splice(
        &mut self,
        e: EntityRef,
        name: &str,
        index: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> ModelResult<Vec<Value>> {
        self.ensure_own_field(e, name)?;
        let own = self.own_field(e, name)?;
        let meta = own.meta.clone();
        let mut list = match &own.value {
            Value::List(list) => list.clone(),
            Value::Null => Vec::new(),
            _ => {
                return Err(ModelError::NotACollection {
                    entity_type: self.type_name(e).unwrap_or_default().to_string(),
                    field: name.to_string(),
                });
            }
        };
        if index > list.len() {
            return Err(ModelError::IndexOutOfBounds {
                index,
                len: list.len(),
            });
        }

        let mut inserts = match &meta.related {
            Some(related) if self.registry().contains(related) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Entity(_) => resolved.push(item),
                        Value::Null => {}
                        other => {
                            let data = mapper::value_to_json(self, &other);
                            resolved.push(Value::Entity(self.create(related, &data)?));
                        }
                    }
                }
                resolved
            }
            _ => items,
        };

        let end = index.saturating_add(delete_count).min(list.len());
        let removed: Vec<Value> = list.drain(index..end).collect();
        if meta.is_entity_set() {
            let mut unique: Vec<Value> = Vec::with_capacity(inserts.len());
            for item in inserts {
                if !list.contains(&item) && !unique.contains(&item) {
                    unique.push(item);
                }
            }
            inserts = unique;
        }
        let added_count = inserts.len();
        list.splice(index..index, inserts);

        if removed.is_empty() && added_count == 0 {
            return Ok(removed);
        }
        let value = Value::List(list);
        self.own_field_mut(e, name)?.value = value.clone();
        self.emit_value(e, name, &value);
        self.notify(&ChangeRecord::splice(
            e,
            name,
            index,
            added_count,
            removed.clone(),
        ));
        Ok(removed)
    }

    /// Appends one element.
    pub fn push(&mut self, e: EntityRef, name: &str, item: impl Into<Value>) -> ModelResult<()> {
        let len = self.value_ref(e, name).and_then(Value::as_list).map_or(0, <[Value]>::len);
        self.splice(e, name, len, 0, vec![item.into()])?;
        Ok(())
    }

    /// Removes the first element equal to `item`. Returns false if absent.
    pub fn remove_item(&mut self, e: EntityRef, name: &str, item: &Value) -> ModelResult<bool> {
        let position = self
            .value_ref(e, name)
            .and_then(Value::as_list)
            .and_then(|list| list.iter().position(|v| v == item));
        match position {
            Some(index) => {
                self.splice(e, name, index, 1, Vec::new())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Plain properties ────────────────────────────────────────────

    /// Sets an undeclared property. Properties are not tracked for changes.
    pub fn set_property(&mut self, e: EntityRef, key: &str, value: impl Into<Value>) -> ModelResult<()> {
        self.record_mut(e)?
            .properties
            .insert(key.to_string(), value.into());
        Ok(())
    }

    #[must_use]
    pub fn property(&self, e: EntityRef, key: &str) -> Option<&Value> {
        self.record(e).ok()?.properties.get(key)
    }
}
