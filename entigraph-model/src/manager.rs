//! The identity context: owner of every instance and its identity map.

use crate::association::OwnAssociation;
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};
use crate::field::OwnField;
use crate::mapper::{self, DeserializeOptions};
use crate::schema::{EntityType, TypeRegistry};
use crate::store::StoreAdapter;
use crate::stream::{Listener, Streams, SubscriptionId, Topic};
use crate::Association;
use entigraph_types::{ChangeRecord, ContextId, EntityRef, Identifier, Identity, Value};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, warn};

/// Key under which an attached instance is indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Registration {
    Anonymous,
    Identified(Identifier),
}

#[derive(Debug)]
pub(crate) struct EntityRecord {
    pub(crate) type_name: String,
    pub(crate) fields: HashMap<String, OwnField>,
    /// Plain properties that are not declared fields.
    pub(crate) properties: BTreeMap<String, Value>,
    pub(crate) associations: Vec<OwnAssociation>,
    pub(crate) registration: Option<Registration>,
    pub(crate) removed: bool,
}

impl EntityRecord {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: HashMap::new(),
            properties: BTreeMap::new(),
            associations: Vec::new(),
            registration: None,
            removed: false,
        }
    }
}

/// One arena slot. A vacant slot keeps its generation so handles to its
/// former occupants stay distinguishable from handles to the next one.
#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<EntityRecord>,
}

#[derive(Debug, Default)]
struct TypeSlots {
    anonymous: Vec<EntityRef>,
    identified: HashMap<Identifier, EntityRef>,
}

/// Instances with pending changes, as a persistence layer would see them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifiedEntities {
    /// Attached instances that have no identifier yet.
    pub created: Vec<EntityRef>,
    /// Identified instances with at least one dirty field.
    pub updated: Vec<EntityRef>,
    /// Identified instances marked removed.
    pub removed: Vec<EntityRef>,
}

impl ModifiedEntities {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Identity context.
///
/// Owns every instance it constructs and guarantees at most one attached
/// instance per (type, identifier). Instances are addressed by [`EntityRef`]
/// handles; every read and write goes through the manager, which keeps
/// fields, associations and subscriptions consistent.
///
/// The manager is single-threaded: listeners run synchronously, in
/// subscription order, during the write that triggered them.
pub struct EntityManager {
    id: ContextId,
    config: ModelConfig,
    registry: TypeRegistry,
    records: Vec<Slot>,
    /// Vacant arena slots, reused before the arena grows.
    vacant: Vec<u32>,
    slots: HashMap<String, TypeSlots>,
    /// Associations derived per type, own fields only. Present once derived.
    pub(crate) derived: HashMap<String, Vec<Rc<Association>>>,
    pub(crate) streams: Streams,
    pub(crate) store: Option<Rc<dyn StoreAdapter>>,
}

impl EntityManager {
    pub fn new(registry: TypeRegistry) -> Self {
        Self::with_config(registry, ModelConfig::default())
    }

    pub fn with_config(registry: TypeRegistry, config: ModelConfig) -> Self {
        let id = ContextId::new();
        debug!("Created identity context {}", id);
        Self {
            id,
            config,
            registry,
            records: Vec::new(),
            vacant: Vec::new(),
            slots: HashMap::new(),
            derived: HashMap::new(),
            streams: Streams::default(),
            store: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Registers (or replaces) an entity type. Instances constructed earlier
    /// keep the associations they were bound with.
    pub fn register(&mut self, ty: EntityType) {
        self.registry.register(ty);
        self.derived.clear();
    }

    // ── Records ─────────────────────────────────────────────────────

    /// The record a handle names. Handles from another context and handles
    /// to a destroyed (or cleared) occupant of a reused slot are rejected.
    pub(crate) fn record(&self, e: EntityRef) -> ModelResult<&EntityRecord> {
        if e.context() != self.id {
            return Err(ModelError::ForeignEntity(e));
        }
        self.records
            .get(e.index())
            .filter(|slot| slot.generation == e.generation())
            .and_then(|slot| slot.record.as_ref())
            .ok_or(ModelError::ForeignEntity(e))
    }

    pub(crate) fn record_mut(&mut self, e: EntityRef) -> ModelResult<&mut EntityRecord> {
        if e.context() != self.id {
            return Err(ModelError::ForeignEntity(e));
        }
        self.records
            .get_mut(e.index())
            .filter(|slot| slot.generation == e.generation())
            .and_then(|slot| slot.record.as_mut())
            .ok_or(ModelError::ForeignEntity(e))
    }

    /// Takes the record out of its slot and makes the slot reusable. A slot
    /// whose generation counter is exhausted is retired instead.
    pub(crate) fn release(&mut self, e: EntityRef) -> ModelResult<EntityRecord> {
        self.record(e)?;
        let slot = &mut self.records[e.index()];
        let record = slot.record.take().ok_or(ModelError::ForeignEntity(e))?;
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.vacant.push(e.index() as u32);
        }
        Ok(record)
    }

    /// True if the handle was minted by this context for an instance that
    /// has since been destroyed or dropped by [`clear`](Self::clear).
    #[must_use]
    pub fn is_stale(&self, e: EntityRef) -> bool {
        e.context() == self.id
            && self
                .records
                .get(e.index())
                .is_some_and(|slot| slot.generation != e.generation() || slot.record.is_none())
    }

    /// True if the handle names an instance of this context.
    #[must_use]
    pub fn contains(&self, e: EntityRef) -> bool {
        self.record(e).is_ok()
    }

    #[must_use]
    pub fn type_name(&self, e: EntityRef) -> Option<&str> {
        self.record(e).ok().map(|r| r.type_name.as_str())
    }

    /// Current identifier of an instance; `None` while anonymous.
    #[must_use]
    pub fn identifier(&self, e: EntityRef) -> Option<Identifier> {
        let record = self.record(e).ok()?;
        let id_field = self.registry.id_field(&record.type_name)?;
        record.fields.get(id_field)?.value.identifier()
    }

    #[must_use]
    pub fn identity(&self, e: EntityRef) -> Option<Identity> {
        let record = self.record(e).ok()?;
        Some(Identity::new(&record.type_name, self.identifier(e)))
    }

    /// Number of live instances, attached or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.iter().filter(|slot| slot.record.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena slots allocated so far, occupied or vacant.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.records.len()
    }

    // ── Construction ────────────────────────────────────────────────

    /// Returns the attached instance for `data`, creating it if needed.
    ///
    /// `data` is either a plain object or a bare identifier. If an instance
    /// with the same (type, identifier) is attached, `data` is merged into
    /// it and that instance is returned. Otherwise a new instance is
    /// constructed, attached and populated. Either way it ends up clean.
    pub fn create(&mut self, type_name: &str, data: &serde_json::Value) -> ModelResult<EntityRef> {
        let ty = self
            .registry
            .get(type_name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;

        let raw_id = match data {
            serde_json::Value::Object(map) => {
                let key = self
                    .registry
                    .field(type_name, &ty.id_field)
                    .and_then(|f| f.plain_key().map(str::to_string))
                    .unwrap_or_else(|| ty.id_field.clone());
                map.get(&key)
                    .or_else(|| map.get(&ty.id_field))
                    .cloned()
                    .unwrap_or_default()
            }
            serde_json::Value::Array(_) => serde_json::Value::Null,
            other => other.clone(),
        };

        if let Some(id) = Identifier::from_json(&raw_id)
            && let Some(existing) = self.lookup(type_name, id)
        {
            self.merge(existing, data)?;
            return Ok(existing);
        }

        let e = self.construct(type_name, Value::from_json(raw_id))?;
        self.attach(e);
        if data.is_object() {
            mapper::from_plain(self, data, e, &DeserializeOptions::default())?;
        }
        self.set_dirty(e, false, None)?;
        debug!("Created entity {} (type={})", e, type_name);
        Ok(e)
    }

    /// Allocates an instance with defaults, computed fields and associations
    /// in place. The instance is not attached.
    pub(crate) fn construct(&mut self, type_name: &str, id: Value) -> ModelResult<EntityRef> {
        self.complete_type(type_name);
        let e = match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.records[index as usize];
                slot.record = Some(EntityRecord::new(type_name));
                EntityRef::with_generation(self.id, index, slot.generation)
            }
            None => {
                let index =
                    u32::try_from(self.records.len()).map_err(|_| ModelError::CapacityExceeded)?;
                self.records.push(Slot {
                    generation: 0,
                    record: Some(EntityRecord::new(type_name)),
                });
                EntityRef::new(self.id, index)
            }
        };

        let fields = self.registry.fields(type_name);
        for field in fields.iter().filter(|f| !f.is_computed()) {
            self.init_own_field(e, field.clone())?;
        }
        if !id.is_null()
            && let Some(id_field) = self.registry.id_field(type_name).map(str::to_string)
            && let Some(own) = self.record_mut(e)?.fields.get_mut(&id_field)
        {
            own.value = id;
        }
        for field in fields.iter().filter(|f| f.is_computed()) {
            self.init_own_field(e, field.clone())?;
        }
        self.bind_associations(e)?;
        Ok(e)
    }

    // ── Identity map ────────────────────────────────────────────────

    /// Indexes the instance under its current identity. An instance already
    /// attached is first detached from its old key.
    ///
    /// Returns false if another instance holds the same identity; the
    /// instance then stays detached.
    pub fn attach(&mut self, e: EntityRef) -> bool {
        let Ok(record) = self.record(e) else {
            return false;
        };
        let type_name = record.type_name.clone();
        if record.registration.is_some() {
            self.detach(e);
        }
        let id = self.identifier(e);
        let slots = self.slots.entry(type_name.clone()).or_default();

        let registration = match id {
            Some(id) => match slots.identified.get(&id) {
                Some(other) if *other != e => {
                    warn!(
                        "Identity {}:{} already held by {}; {} stays detached",
                        type_name, id, other, e
                    );
                    return false;
                }
                _ => {
                    slots.identified.insert(id.clone(), e);
                    Registration::Identified(id)
                }
            },
            None => {
                if !slots.anonymous.contains(&e) {
                    slots.anonymous.push(e);
                }
                Registration::Anonymous
            }
        };
        if let Ok(record) = self.record_mut(e) {
            record.registration = Some(registration);
        }
        true
    }

    /// Removes the instance from the identity map. Idempotent.
    pub fn detach(&mut self, e: EntityRef) {
        let Ok(record) = self.record_mut(e) else {
            return;
        };
        let Some(registration) = record.registration.take() else {
            return;
        };
        let type_name = record.type_name.clone();
        let Some(slots) = self.slots.get_mut(&type_name) else {
            return;
        };
        match registration {
            Registration::Anonymous => slots.anonymous.retain(|a| *a != e),
            Registration::Identified(id) => {
                if slots.identified.get(&id) == Some(&e) {
                    slots.identified.remove(&id);
                }
            }
        }
    }

    #[must_use]
    pub fn is_attached(&self, e: EntityRef) -> bool {
        self.record(e).is_ok_and(|r| r.registration.is_some())
    }

    /// The attached instance with this identity, if any.
    pub fn lookup(&self, type_name: &str, id: impl Into<Identifier>) -> Option<EntityRef> {
        let id = id.into();
        self.slots.get(type_name)?.identified.get(&id).copied()
    }

    /// The attached instance sharing `e`'s identity, which may be `e` itself.
    #[must_use]
    pub fn lookup_instance(&self, e: EntityRef) -> Option<EntityRef> {
        let type_name = self.type_name(e)?;
        self.lookup(type_name, self.identifier(e)?)
    }

    /// Attached instances of a type, in construction order.
    #[must_use]
    pub fn instances(&self, type_name: &str) -> Vec<EntityRef> {
        let Some(slots) = self.slots.get(type_name) else {
            return Vec::new();
        };
        let mut all: Vec<EntityRef> = slots
            .anonymous
            .iter()
            .chain(slots.identified.values())
            .copied()
            .collect();
        all.sort_unstable();
        all
    }

    /// Drops every instance without running association cleanup. Their
    /// handles go stale, their slots become reusable and every subscription
    /// tied to one of them is released. Type-wide and model-wide
    /// subscriptions survive.
    pub fn clear(&mut self) {
        let live: Vec<EntityRef> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .map(|(index, slot)| EntityRef::with_generation(self.id, index as u32, slot.generation))
            .collect();
        self.slots.clear();
        for e in &live {
            let _ = self.release(*e);
        }
        let released = self.streams.unsubscribe_entities();
        debug!(
            "Cleared identity context {} ({} instances, {} subscriptions)",
            self.id,
            live.len(),
            released
        );
    }

    /// Attached instances with pending changes, optionally of one type.
    #[must_use]
    pub fn modified_entities(&self, type_name: Option<&str>) -> ModifiedEntities {
        let mut modified = ModifiedEntities::default();
        for (name, slots) in &self.slots {
            if type_name.is_some_and(|t| t != name) {
                continue;
            }
            modified.created.extend(slots.anonymous.iter().copied());
            for e in slots.identified.values() {
                if self.is_removed(*e) {
                    modified.removed.push(*e);
                } else if self.is_dirty(*e) {
                    modified.updated.push(*e);
                }
            }
        }
        modified.created.sort_unstable();
        modified.updated.sort_unstable();
        modified.removed.sort_unstable();
        modified
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribes to change records of one field of one instance.
    pub fn subscribe<F>(&mut self, e: EntityRef, field: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &ChangeRecord) + 'static,
    {
        self.streams.subscribe(
            Topic::Field(e, field.to_string()),
            Listener::Changes(Rc::new(callback)),
        )
    }

    /// Subscribes to the new values of one field of one instance.
    pub fn subscribe_values<F>(&mut self, e: EntityRef, field: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &Value) + 'static,
    {
        self.streams.subscribe(
            Topic::Values(e, field.to_string()),
            Listener::Values(Rc::new(callback)),
        )
    }

    /// Subscribes to change records of any field of one instance.
    pub fn subscribe_entity<F>(&mut self, e: EntityRef, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &ChangeRecord) + 'static,
    {
        self.streams
            .subscribe(Topic::Entity(e), Listener::Changes(Rc::new(callback)))
    }

    /// Subscribes to change records of one field across a whole type.
    pub fn subscribe_type<F>(&mut self, type_name: &str, field: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &ChangeRecord) + 'static,
    {
        self.streams.subscribe(
            Topic::TypeField(type_name.to_string(), field.to_string()),
            Listener::Changes(Rc::new(callback)),
        )
    }

    /// Subscribes to every change record of the context.
    pub fn subscribe_model<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&mut EntityManager, &ChangeRecord) + 'static,
    {
        self.streams
            .subscribe(Topic::Model, Listener::Changes(Rc::new(callback)))
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.streams.unsubscribe(id)
    }

    /// Number of live subscriptions, internal ones included.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.streams.len()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Publishes a change record: field, instance, type and model topics,
    /// in that order.
    pub(crate) fn notify(&mut self, record: &ChangeRecord) {
        let e = record.object;
        let name = record.field_name().to_string();
        let Some(type_name) = self.type_name(e).map(str::to_string) else {
            return;
        };
        let mut listeners = self.streams.listeners(&Topic::Field(e, name.clone()));
        listeners.extend(self.streams.listeners(&Topic::Entity(e)));
        listeners.extend(self.streams.listeners(&Topic::TypeField(type_name, name)));
        listeners.extend(self.streams.listeners(&Topic::Model));

        for (id, listener) in listeners {
            // An earlier listener may have disposed a later one.
            if !self.streams.is_active(id) {
                continue;
            }
            let result = match listener {
                Listener::Changes(callback) => {
                    callback(self, record);
                    Ok(())
                }
                Listener::AssociationSource { owner, association } => {
                    self.propagate_association(owner, &association, record)
                }
                Listener::AssociationIdentity { owner, association } => {
                    self.identify_association(owner, &association, id);
                    Ok(())
                }
                Listener::Recompute { owner, field } => self.recompute(owner, &field),
                Listener::Values(_) => Ok(()),
            };
            if let Err(err) = result {
                warn!("Listener failed on change of {}.{}: {}", e, record.field_name(), err);
            }
        }
    }

    /// Publishes a field's new value to its value stream.
    pub(crate) fn emit_value(&mut self, e: EntityRef, field: &str, value: &Value) {
        let listeners = self.streams.listeners(&Topic::Values(e, field.to_string()));
        for (id, listener) in listeners {
            if !self.streams.is_active(id) {
                continue;
            }
            let result = match listener {
                Listener::Values(callback) => {
                    callback(self, value);
                    Ok(())
                }
                Listener::Recompute { owner, field } => self.recompute(owner, &field),
                _ => Ok(()),
            };
            if let Err(err) = result {
                warn!("Value listener failed on {}.{}: {}", e, field, err);
            }
        }
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("instances", &self.len())
            .field("subscriptions", &self.streams.len())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
