//! Subscription bookkeeping for change records and field values.
//!
//! Every mutation is announced on a fixed set of topics. Listeners either
//! run user callbacks or route back into the manager (recomputing a computed
//! field, propagating an association). Dispatch always goes through the
//! manager so listeners get `&mut EntityManager` and may write further.

use crate::EntityManager;
use entigraph_types::{ChangeRecord, EntityRef, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type ChangeCallback = Rc<dyn Fn(&mut EntityManager, &ChangeRecord)>;
pub type ValueCallback = Rc<dyn Fn(&mut EntityManager, &Value)>;

/// Token returned by a subscription; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Where a notification is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Change records of one field of one instance.
    Field(EntityRef, String),
    /// New values of one field of one instance.
    Values(EntityRef, String),
    /// Change records of any field of one instance.
    Entity(EntityRef),
    /// Change records of one field across all instances of a type.
    TypeField(String, String),
    /// Every change record in the context.
    Model,
}

impl Topic {
    /// The instance a per-instance topic belongs to.
    #[must_use]
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Self::Field(e, _) | Self::Values(e, _) | Self::Entity(e) => Some(*e),
            Self::TypeField(..) | Self::Model => None,
        }
    }
}

#[derive(Clone)]
pub(crate) enum Listener {
    Changes(ChangeCallback),
    Values(ValueCallback),
    /// Recompute `field` of `owner` from its getter.
    Recompute { owner: EntityRef, field: String },
    /// Propagate a change of `owner`'s association source field.
    AssociationSource { owner: EntityRef, association: Rc<str> },
    /// Record `owner`'s identifier once it gets one.
    AssociationIdentity { owner: EntityRef, association: Rc<str> },
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changes(_) => f.write_str("Changes(..)"),
            Self::Values(_) => f.write_str("Values(..)"),
            Self::Recompute { owner, field } => {
                write!(f, "Recompute({owner}.{field})")
            }
            Self::AssociationSource { owner, association } => {
                write!(f, "AssociationSource({owner}, {association})")
            }
            Self::AssociationIdentity { owner, association } => {
                write!(f, "AssociationIdentity({owner}, {association})")
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Streams {
    next_id: u64,
    topics: HashMap<Topic, Vec<(SubscriptionId, Listener)>>,
    index: HashMap<SubscriptionId, Topic>,
}

impl Streams {
    pub(crate) fn subscribe(&mut self, topic: Topic, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.topics
            .entry(topic.clone())
            .or_default()
            .push((id, listener));
        self.index.insert(id, topic);
        id
    }

    /// Returns false if the subscription was already gone.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(topic) = self.index.remove(&id) else {
            return false;
        };
        if let Some(listeners) = self.topics.get_mut(&topic) {
            listeners.retain(|(sid, _)| *sid != id);
            if listeners.is_empty() {
                self.topics.remove(&topic);
            }
        }
        true
    }

    /// Drops every subscription to a topic of `e`.
    pub(crate) fn unsubscribe_entity(&mut self, e: EntityRef) -> usize {
        self.unsubscribe_where(|topic| topic.entity() == Some(e))
    }

    /// Drops every per-instance subscription, keeping type-wide and
    /// model-wide ones.
    pub(crate) fn unsubscribe_entities(&mut self) -> usize {
        self.unsubscribe_where(|topic| topic.entity().is_some())
    }

    fn unsubscribe_where(&mut self, matches: impl Fn(&Topic) -> bool) -> usize {
        let doomed: Vec<SubscriptionId> = self
            .index
            .iter()
            .filter(|(_, topic)| matches(topic))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.unsubscribe(*id);
        }
        doomed.len()
    }

    pub(crate) fn is_active(&self, id: SubscriptionId) -> bool {
        self.index.contains_key(&id)
    }

    /// Snapshot of the listeners of a topic, in subscription order.
    pub(crate) fn listeners(&self, topic: &Topic) -> Vec<(SubscriptionId, Listener)> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}
