//! Entity type metadata: field declarations, mapping rules and the registry
//! every [`EntityManager`](crate::EntityManager) resolves type names against.

use crate::EntityManager;
use entigraph_types::{EntityRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Computes a field from the rest of the instance.
pub type Getter = Rc<dyn Fn(&EntityManager, EntityRef) -> Value>;
/// Intercepts a write. Returning `Some` replaces the value being stored.
pub type Setter = Rc<dyn Fn(&mut EntityManager, EntityRef, &Value) -> Option<Value>>;
/// Rewrites a field value on its way out, given the field name.
pub type Formatter = Rc<dyn Fn(&str, &Value) -> Value>;
/// Rewrites raw input before it is assigned.
pub type Parser = Rc<dyn Fn(&serde_json::Value) -> serde_json::Value>;
pub type Validator = Rc<dyn Fn(&Value) -> bool>;

/// Declared shape of a field value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[default]
    Any,
    Text,
    Number,
    Bool,
    /// A single (possibly related) object.
    Object,
    /// A collection.
    Array,
}

impl ValueKind {
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Array)
    }
}

/// When a field is skipped by the mapper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Ignore {
    #[default]
    Never,
    Always,
    /// Skipped only under one of the named scenarios.
    Scenarios(Vec<String>),
}

impl Ignore {
    /// Parses a comma-separated scenario list such as `"PUT, DELETE"`.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let scenarios: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if scenarios.is_empty() {
            Self::Never
        } else {
            Self::Scenarios(scenarios)
        }
    }

    /// True if the field is skipped under `scenario`. No scenario means only
    /// unconditional ignores apply.
    #[must_use]
    pub fn applies(&self, scenario: Option<&str>) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Scenarios(list) => scenario.is_some_and(|s| list.iter().any(|l| l == s)),
        }
    }
}

impl From<bool> for Ignore {
    fn from(always: bool) -> Self {
        if always { Self::Always } else { Self::Never }
    }
}

impl From<&str> for Ignore {
    fn from(list: &str) -> Self {
        Self::parse(list)
    }
}

/// Initial value of a field on a fresh instance.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    /// Evaluated once per instance, so instances never share a collection.
    Factory(Rc<dyn Fn() -> Value>),
}

impl DefaultValue {
    #[must_use]
    pub fn produce(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Declaration of one field of an entity type.
#[derive(Clone, Default)]
pub struct Field {
    pub name: String,
    pub kind: ValueKind,
    /// Entity type held by this field, if it references entities.
    pub related: Option<String>,
    /// Field on the related type that mirrors this one.
    pub inverse: Option<String>,
    /// Sibling fields whose changes trigger recomputation.
    pub depends_on: Vec<String>,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
    pub default: Option<DefaultValue>,
    /// Key used in plain data. `Some("")` keeps the field out of serialized
    /// output.
    pub alias: Option<String>,
    pub ignore: Ignore,
    pub formatter: Option<Formatter>,
    pub parser: Option<Parser>,
    pub validator: Option<Validator>,
    pub flags: HashSet<String>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Shorthand for a text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name).kind(ValueKind::Text)
    }

    /// Shorthand for a numeric field.
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name).kind(ValueKind::Number)
    }

    /// Shorthand for a single related entity mirrored by `inverse`.
    pub fn has_one(
        name: impl Into<String>,
        related: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::reference(name, related).inverse(inverse)
    }

    /// Shorthand for a related-entity collection mirrored by `inverse`.
    pub fn has_many(
        name: impl Into<String>,
        related: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::references(name, related).inverse(inverse)
    }

    /// Shorthand for a single related entity with no inverse.
    pub fn reference(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name).kind(ValueKind::Object).related(related)
    }

    /// Shorthand for a related-entity collection with no inverse.
    pub fn references(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name).kind(ValueKind::Array).related(related)
    }

    /// Shorthand for a computed field.
    pub fn computed<F>(name: impl Into<String>, depends_on: &[&str], getter: F) -> Self
    where
        F: Fn(&EntityManager, EntityRef) -> Value + 'static,
    {
        Self::new(name)
            .getter(getter)
            .depends_on(depends_on.iter().copied())
    }

    #[must_use]
    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn related(mut self, related: impl Into<String>) -> Self {
        self.related = Some(related.into());
        self
    }

    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&EntityManager, EntityRef) -> Value + 'static,
    {
        self.getter = Some(Rc::new(getter));
        self
    }

    #[must_use]
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut EntityManager, EntityRef, &Value) -> Option<Value> + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    #[must_use]
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + 'static,
    {
        self.default = Some(DefaultValue::Factory(Rc::new(factory)));
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn ignore(mut self, ignore: impl Into<Ignore>) -> Self {
        self.ignore = ignore.into();
        self
    }

    #[must_use]
    pub fn formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&str, &Value) -> Value + 'static,
    {
        self.formatter = Some(Rc::new(formatter));
        self
    }

    #[must_use]
    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&serde_json::Value) -> serde_json::Value + 'static,
    {
        self.parser = Some(Rc::new(parser));
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Sets a free-form flag. The mapper honors `"FK"`, which serializes
    /// the field as identifiers regardless of depth.
    #[must_use]
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.getter.is_some()
    }

    /// True for collections of related entities, which behave as sets.
    #[must_use]
    pub fn is_entity_set(&self) -> bool {
        self.kind.is_collection() && self.related.is_some()
    }

    /// Key of this field in plain data, or `None` if it is never serialized.
    #[must_use]
    pub fn plain_key(&self) -> Option<&str> {
        match self.alias.as_deref() {
            Some("") => None,
            Some(alias) => Some(alias),
            None => Some(&self.name),
        }
    }

    /// Value of this field on a fresh instance. Collections start empty.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        match &self.default {
            Some(default) => default.produce(),
            None if self.kind.is_collection() => Value::List(Vec::new()),
            None => Value::Null,
        }
    }

    /// Runs the validator; fields without one accept anything.
    #[must_use]
    pub fn validate(&self, value: &Value) -> bool {
        self.validator.as_ref().is_none_or(|v| v(value))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("related", &self.related)
            .field("inverse", &self.inverse)
            .field("depends_on", &self.depends_on)
            .field("computed", &self.getter.is_some())
            .field("alias", &self.alias)
            .field("ignore", &self.ignore)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Declaration of an entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: String,
    pub supertype: Option<String>,
    pub id_field: String,
    /// Serialization depth used by [`EntityManager::to_json`].
    pub serialize_depth: usize,
    fields: Vec<Rc<Field>>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supertype: None,
            id_field: "id".to_string(),
            serialize_depth: 1,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    #[must_use]
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    #[must_use]
    pub fn serialize_depth(mut self, depth: usize) -> Self {
        self.serialize_depth = depth;
        self
    }

    /// Declares a field, replacing an earlier declaration of the same name.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        let field = Rc::new(field);
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Fields declared on this type itself, in declaration order.
    #[must_use]
    pub fn own_fields(&self) -> &[Rc<Field>] {
        &self.fields
    }

    #[must_use]
    pub fn own_field(&self, name: &str) -> Option<&Rc<Field>> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn own_field_by_alias(&self, key: &str) -> Option<&Rc<Field>> {
        self.fields
            .iter()
            .find(|f| f.alias.as_deref().is_some_and(|a| !a.is_empty() && a == key))
    }
}

/// All entity types known to one identity context.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Rc<EntityType>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type. The identifier field is always declared: a type that
    /// does not declare it gets a plain field of that name.
    pub fn register(&mut self, ty: EntityType) -> Rc<EntityType> {
        let ty = if ty.own_field(&ty.id_field).is_none() && !self.inherits_id(&ty) {
            let id = ty.id_field.clone();
            ty.field(Field::new(id))
        } else {
            ty
        };
        let ty = Rc::new(ty);
        if self.types.insert(ty.name.clone(), ty.clone()).is_some() {
            warn!(entity_type = %ty.name, "entity type re-registered; previous declaration replaced");
        } else {
            debug!(entity_type = %ty.name, fields = ty.fields.len(), "entity type registered");
        }
        ty
    }

    fn inherits_id(&self, ty: &EntityType) -> bool {
        ty.supertype
            .as_deref()
            .is_some_and(|s| self.field(s, &ty.id_field).is_some())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rc<EntityType>> {
        self.types.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Type names in registration-independent (sorted) order.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The type followed by its supertypes, nearest first. Unregistered
    /// supertypes end the chain.
    #[must_use]
    pub fn chain(&self, name: &str) -> Vec<Rc<EntityType>> {
        let mut chain: Vec<Rc<EntityType>> = Vec::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            let Some(ty) = self.types.get(&current) else {
                break;
            };
            if chain.iter().any(|t| t.name == ty.name) {
                warn!(entity_type = %name, "cyclic supertype chain");
                break;
            }
            next = ty.supertype.clone();
            chain.push(ty.clone());
        }
        chain
    }

    /// True if `name` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        self.chain(name).iter().any(|t| t.name == ancestor)
    }

    /// Resolves a field on the type or the nearest supertype declaring it.
    #[must_use]
    pub fn field(&self, type_name: &str, field: &str) -> Option<Rc<Field>> {
        self.chain(type_name)
            .iter()
            .find_map(|t| t.own_field(field).cloned())
    }

    /// Every field visible on the type, supertype fields first. A subtype
    /// redeclaring a field overrides it in place.
    #[must_use]
    pub fn fields(&self, type_name: &str) -> Vec<Rc<Field>> {
        let mut fields: Vec<Rc<Field>> = Vec::new();
        for ty in self.chain(type_name).iter().rev() {
            for field in ty.own_fields() {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(slot) => *slot = field.clone(),
                    None => fields.push(field.clone()),
                }
            }
        }
        fields
    }

    /// Resolves a plain-data key: an alias first, then a field name.
    #[must_use]
    pub fn field_by_key(&self, type_name: &str, key: &str) -> Option<Rc<Field>> {
        let chain = self.chain(type_name);
        chain
            .iter()
            .find_map(|t| t.own_field_by_alias(key).cloned())
            .or_else(|| chain.iter().find_map(|t| t.own_field(key).cloned()))
    }

    /// Name of the identifier field of a type.
    #[must_use]
    pub fn id_field(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).map(|t| t.id_field.as_str())
    }
}
