//! Bidirectional associations between fields of related entity types.
//!
//! An [`Association`] is derived once per type from every field that names
//! both a related type and an inverse field. Each instance binds one
//! [`OwnAssociation`] per association of its type chain; it listens to the
//! source field and mirrors every change onto the inverse field of the
//! affected targets.

use crate::error::ModelResult;
use crate::schema::{Field, TypeRegistry, ValueKind};
use crate::stream::{Listener, SubscriptionId, Topic};
use crate::EntityManager;
use entigraph_types::{ChangeKind, ChangeRecord, EntityRef, Identifier, Value};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Cardinality of an association, seen from its source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Singular source, singular target (`I_I`).
    OneToOne,
    /// Collection source, singular target (`I_N`).
    OneToMany,
    /// Singular source, collection target (`N_I`).
    ManyToOne,
    /// Collection on both sides (`M_N`).
    ManyToMany,
}

impl Cardinality {
    #[must_use]
    pub const fn from_sides(source_many: bool, target_many: bool) -> Self {
        match (source_many, target_many) {
            (false, false) => Self::OneToOne,
            (true, false) => Self::OneToMany,
            (false, true) => Self::ManyToOne,
            (true, true) => Self::ManyToMany,
        }
    }

    /// Short code: `I_I`, `I_N`, `N_I` or `M_N`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OneToOne => "I_I",
            Self::OneToMany => "I_N",
            Self::ManyToOne => "N_I",
            Self::ManyToMany => "M_N",
        }
    }
}

/// One side of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationNode {
    pub type_name: String,
    pub field: String,
    pub kind: ValueKind,
}

impl AssociationNode {
    fn new(type_name: &str, field: &Field) -> Self {
        Self {
            type_name: type_name.to_string(),
            field: field.name.clone(),
            kind: field.kind,
        }
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }
}

/// Type-level description of a bidirectional link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub source: AssociationNode,
    pub target: AssociationNode,
    pub cardinality: Cardinality,
    id: Rc<str>,
}

impl Association {
    /// Derives the association declared by `field` of `owner`, if any.
    ///
    /// Fields without a related type or without an inverse declare none. A
    /// declaration naming an unknown type or an undeclared inverse field is
    /// reported and skipped.
    pub(crate) fn derive(registry: &TypeRegistry, owner: &str, field: &Field) -> Option<Self> {
        let (related, inverse) = match (&field.related, &field.inverse) {
            (Some(related), Some(inverse)) => (related, inverse),
            _ => return None,
        };
        if !registry.contains(related) {
            error!(
                "Association {}.{} names unknown type '{}'; skipped",
                owner, field.name, related
            );
            return None;
        }
        let Some(inverse_field) = registry.field(related, inverse) else {
            error!(
                "Association {}.{} names missing inverse field {}.{}; skipped",
                owner, field.name, related, inverse
            );
            return None;
        };

        let source = AssociationNode::new(owner, field);
        let target = AssociationNode::new(related, &inverse_field);
        let id: Rc<str> = format!(
            "{}:{}:{}:{}",
            source.type_name, source.field, target.type_name, target.field
        )
        .into();
        Some(Self {
            cardinality: Cardinality::from_sides(source.is_collection(), target.is_collection()),
            source,
            target,
            id,
        })
    }

    /// `"Source:field:Target:inverse"`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unlinks `entity` from every target currently held by its source field:
    /// a singular inverse pointing back is nulled, a collection inverse loses
    /// `entity`. Nothing happens while the source field is empty.
    pub fn remove(&self, manager: &mut EntityManager, entity: EntityRef) -> ModelResult<()> {
        let targets = manager.get(entity, &self.source.field).entities();
        for target in targets {
            manager.unlink(target, &self.target.field, entity)?;
        }
        Ok(())
    }
}

/// Per-instance binding of an [`Association`].
#[derive(Debug)]
pub(crate) struct OwnAssociation {
    pub(crate) association: Rc<Association>,
    /// Identifier of the owning instance, once it has one.
    pub(crate) source_key: Option<Identifier>,
    pub(crate) field_subscription: SubscriptionId,
    /// Waits for an anonymous owner to be identified.
    pub(crate) identity_subscription: Option<SubscriptionId>,
    /// Set while a change of the source field is being mirrored.
    pub(crate) propagating: bool,
}

impl EntityManager {
    /// Derives the associations of the type and its supertypes, once each.
    pub(crate) fn complete_type(&mut self, type_name: &str) {
        for ty in self.registry().chain(type_name) {
            if self.derived.contains_key(&ty.name) {
                continue;
            }
            let associations: Vec<Rc<Association>> = ty
                .own_fields()
                .iter()
                .filter_map(|f| Association::derive(self.registry(), &ty.name, f))
                .map(Rc::new)
                .collect();
            debug!(
                "Derived {} association(s) for type {}",
                associations.len(),
                ty.name
            );
            self.derived.insert(ty.name.clone(), associations);
        }
    }

    /// Associations of a type, including those declared by its supertypes.
    pub fn type_associations(&mut self, type_name: &str) -> Vec<Rc<Association>> {
        self.complete_type(type_name);
        let mut all: Vec<Rc<Association>> = Vec::new();
        for ty in self.registry().chain(type_name) {
            for association in self.derived.get(&ty.name).into_iter().flatten() {
                if !all.iter().any(|a| a.id == association.id) {
                    all.push(association.clone());
                }
            }
        }
        all
    }

    /// Associations bound on an instance, deduplicated by id.
    #[must_use]
    pub fn associations(&self, e: EntityRef) -> Vec<Rc<Association>> {
        let Ok(record) = self.record(e) else {
            return Vec::new();
        };
        let mut all: Vec<Rc<Association>> = Vec::new();
        for own in &record.associations {
            if !all.iter().any(|a| a.id == own.association.id) {
                all.push(own.association.clone());
            }
        }
        all
    }

    /// Identifier recorded by an instance's binding of an association.
    #[must_use]
    pub fn association_source_key(&self, e: EntityRef, association: &str) -> Option<Identifier> {
        self.record(e)
            .ok()?
            .associations
            .iter()
            .find(|own| &*own.association.id == association)?
            .source_key
            .clone()
    }

    pub(crate) fn bind_associations(&mut self, e: EntityRef) -> ModelResult<()> {
        let type_name = self.record(e)?.type_name.clone();
        let id_field = self
            .registry()
            .id_field(&type_name)
            .unwrap_or("id")
            .to_string();
        let source_key = self.identifier(e);

        for association in self.type_associations(&type_name) {
            let field_subscription = self.streams.subscribe(
                Topic::Field(e, association.source.field.clone()),
                Listener::AssociationSource {
                    owner: e,
                    association: association.id.clone(),
                },
            );
            let identity_subscription = source_key.is_none().then(|| {
                self.streams.subscribe(
                    Topic::Field(e, id_field.clone()),
                    Listener::AssociationIdentity {
                        owner: e,
                        association: association.id.clone(),
                    },
                )
            });
            debug!("Bound association {} on {}", association.id, e);
            self.record_mut(e)?.associations.push(OwnAssociation {
                association,
                source_key: source_key.clone(),
                field_subscription,
                identity_subscription,
                propagating: false,
            });
        }
        Ok(())
    }

    /// Drops every association binding of an instance.
    pub(crate) fn unbind_associations(&mut self, e: EntityRef) -> ModelResult<()> {
        let bindings = std::mem::take(&mut self.record_mut(e)?.associations);
        for own in bindings {
            self.streams.unsubscribe(own.field_subscription);
            if let Some(id) = own.identity_subscription {
                self.streams.unsubscribe(id);
            }
        }
        Ok(())
    }

    fn binding_mut(&mut self, owner: EntityRef, association: &str) -> Option<&mut OwnAssociation> {
        self.record_mut(owner)
            .ok()?
            .associations
            .iter_mut()
            .find(|own| &*own.association.id == association)
    }

    /// Records the owner's identifier, then stops waiting for it.
    pub(crate) fn identify_association(
        &mut self,
        owner: EntityRef,
        association: &str,
        subscription: SubscriptionId,
    ) {
        let Some(id) = self.identifier(owner) else {
            return;
        };
        if let Some(own) = self.binding_mut(owner, association) {
            own.source_key = Some(id);
            own.identity_subscription = None;
        }
        self.streams.unsubscribe(subscription);
    }

    /// Mirrors one change of the owner's source field onto the targets.
    /// Changes arriving while this binding is already mirroring are dropped,
    /// which stops the inverse side from echoing back.
    pub(crate) fn propagate_association(
        &mut self,
        owner: EntityRef,
        association: &str,
        record: &ChangeRecord,
    ) -> ModelResult<()> {
        let Some(own) = self.binding_mut(owner, association) else {
            return Ok(());
        };
        if own.propagating {
            debug!("Association {} on {} already propagating", association, owner);
            return Ok(());
        }
        own.propagating = true;
        let association = own.association.clone();

        let result = self.update_inverse(owner, &association, record);
        if let Some(own) = self.binding_mut(owner, &association.id) {
            own.propagating = false;
        }
        result
    }

    fn update_inverse(
        &mut self,
        source: EntityRef,
        association: &Association,
        record: &ChangeRecord,
    ) -> ModelResult<()> {
        let current = self.get(source, &association.source.field);
        let (added, removed): (Vec<EntityRef>, Vec<EntityRef>) = match record.kind {
            ChangeKind::Splice => {
                let index = record.index.unwrap_or(0);
                let count = record.added_count.unwrap_or(0);
                let added = current
                    .as_list()
                    .map(|list| {
                        list.iter()
                            .skip(index)
                            .take(count)
                            .filter_map(Value::as_entity)
                            .collect()
                    })
                    .unwrap_or_default();
                let removed = record
                    .removed
                    .iter()
                    .flatten()
                    .filter_map(Value::as_entity)
                    .filter(|t| !current.references(*t))
                    .collect();
                (added, removed)
            }
            ChangeKind::Update => {
                let old = record.old_value.clone().unwrap_or_default();
                if old == current {
                    return Ok(());
                }
                let removed = old
                    .entities()
                    .into_iter()
                    .filter(|t| !current.references(*t))
                    .collect();
                let added = current
                    .entities()
                    .into_iter()
                    .filter(|t| !old.references(*t))
                    .collect();
                (added, removed)
            }
        };

        let target_field = &association.target.field;
        for target in removed {
            if let Err(err) = self.unlink(target, target_field, source) {
                warn!("Failed to unlink {} from {}.{}: {}", source, target, target_field, err);
            }
        }
        for target in added {
            if let Err(err) = self.link(target, target_field, source) {
                warn!("Failed to link {} into {}.{}: {}", source, target, target_field, err);
            }
        }
        Ok(())
    }

    /// Makes `target.field` reference `source`.
    fn link(&mut self, target: EntityRef, field: &str, source: EntityRef) -> ModelResult<()> {
        let holds_collection = self
            .type_name(target)
            .and_then(|t| self.registry().field(t, field))
            .is_some_and(|f| f.kind.is_collection())
            || self.value_ref(target, field).is_some_and(Value::is_list);
        if holds_collection {
            if !self.get(target, field).references(source) {
                self.push(target, field, source)?;
            }
            Ok(())
        } else {
            self.put(target, field, source)
        }
    }

    /// Stops `target.field` from referencing `source`. A singular field
    /// pointing elsewhere is left alone.
    pub(crate) fn unlink(&mut self, target: EntityRef, field: &str, source: EntityRef) -> ModelResult<()> {
        match self.get(target, field) {
            current @ Value::List(_) if current.references(source) => {
                self.remove_item(target, field, &Value::Entity(source))?;
            }
            Value::Entity(held) if held == source => {
                self.put(target, field, Value::Null)?;
            }
            _ => {}
        }
        Ok(())
    }
}
