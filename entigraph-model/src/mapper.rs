//! Conversion between instances and plain JSON.
//!
//! Serialization walks the entity graph breadth-limited by a depth bound.
//! The instance being serialized sits at depth 1; an entity or collection
//! below the bound is rendered as its identifier (or identifier array), so
//! cyclic graphs always terminate. Collection elements share their
//! collection's depth.
//!
//! Deserialization resolves aliases, applies parsers and instantiates
//! related entities through the identity context, so every reference in the
//! input lands on the one attached instance of its identity.

use crate::error::ModelResult;
use crate::schema::Field;
use crate::EntityManager;
use entigraph_types::{EntityRef, Value};
use serde_json::{Map, Value as Json};
use tracing::warn;

/// Hard upper bound on serialization depth.
pub const SERIALIZE_DEPTH_MAXIMUM: usize = 25;

/// Options for [`to_plain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Depth bound; `None` (or anything above the configured maximum) means
    /// the maximum. `0` renders the bare identifier.
    pub depth: Option<usize>,
    /// Fields ignored under this scenario are skipped.
    pub scenario: Option<String>,
}

impl SerializeOptions {
    #[must_use]
    pub fn depth(depth: usize) -> Self {
        Self {
            depth: Some(depth),
            scenario: None,
        }
    }

    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }
}

/// Options for [`from_plain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeserializeOptions {
    /// Fields ignored under this scenario are skipped. `None` uses the
    /// context's default scenario.
    pub scenario: Option<String>,
}

impl DeserializeOptions {
    #[must_use]
    pub fn scenario(scenario: impl Into<String>) -> Self {
        Self {
            scenario: Some(scenario.into()),
        }
    }
}

/// Plain properties with these prefixes are internal and never mapped.
fn is_internal(key: &str) -> bool {
    key.starts_with('_') || key.starts_with('$')
}

struct Serializer<'m> {
    manager: &'m EntityManager,
    bound: usize,
    scenario: Option<&'m str>,
    depth: usize,
    truncated: bool,
}

impl Serializer<'_> {
    fn value(&mut self, value: &Value) -> Json {
        self.depth += 1;
        let out = match value {
            Value::Entity(e) if self.depth > self.bound => {
                self.truncated = true;
                id_json(self.manager, *e)
            }
            Value::List(items) if self.depth > self.bound => {
                self.truncated = true;
                ids_json(self.manager, items)
            }
            Value::Entity(e) => Json::Object(self.entity(*e)),
            Value::List(items) => {
                // Elements stay at the collection's depth.
                self.depth -= 1;
                let items = items.iter().map(|item| self.value(item)).collect();
                self.depth += 1;
                Json::Array(items)
            }
            other => value_to_json(self.manager, other),
        };
        self.depth -= 1;
        out
    }

    fn entity(&mut self, e: EntityRef) -> Map<String, Json> {
        let manager = self.manager;
        let mut out = Map::new();
        let Ok(record) = manager.record(e) else {
            return out;
        };
        for field in manager.registry().fields(&record.type_name) {
            let Some(own) = record.fields.get(&field.name) else {
                continue;
            };
            if is_internal(&field.name) || field.ignore.applies(self.scenario) {
                continue;
            }
            let Some(key) = field.plain_key() else {
                continue;
            };
            let json = self.field(&field, &own.value);
            out.insert(key.to_string(), json);
        }
        for (key, value) in &record.properties {
            if is_internal(key) || out.contains_key(key) {
                continue;
            }
            let json = self.value(value);
            out.insert(key.clone(), json);
        }
        out
    }

    fn field(&mut self, field: &Field, value: &Value) -> Json {
        if let Some(formatter) = &field.formatter {
            let formatted = formatter(&field.name, value);
            return self.value(&formatted);
        }
        if field.has_flag("FK") {
            return match value {
                Value::List(items) => ids_json(self.manager, items),
                Value::Entity(e) => id_json(self.manager, *e),
                other => value_to_json(self.manager, other),
            };
        }
        self.value(value)
    }
}

/// Raw identifier of an entity; `null` while anonymous.
fn id_json(manager: &EntityManager, e: EntityRef) -> Json {
    let Some(id_field) = manager.type_name(e).and_then(|t| manager.registry().id_field(t)) else {
        return Json::Null;
    };
    match manager.value_ref(e, id_field) {
        Some(Value::String(s)) if s.is_empty() => Json::Null,
        Some(value) if !value.is_list() && value.as_entity().is_none() => {
            value_to_json(manager, value)
        }
        _ => Json::Null,
    }
}

/// Identifier array of a collection; `null` for an empty one.
fn ids_json(manager: &EntityManager, items: &[Value]) -> Json {
    if items.is_empty() {
        return Json::Null;
    }
    Json::Array(
        items
            .iter()
            .map(|item| match item {
                Value::Entity(e) => id_json(manager, *e),
                other => value_to_json(manager, other),
            })
            .collect(),
    )
}

/// Plain JSON form of a value. Entity references become identifiers.
pub(crate) fn value_to_json(manager: &EntityManager, value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Object(map) => Json::Object(map.clone()),
        Value::Entity(e) => id_json(manager, *e),
        Value::List(items) => Json::Array(items.iter().map(|v| value_to_json(manager, v)).collect()),
    }
}

/// Serializes an instance to plain JSON.
///
/// At depth `0` the result is the bare identifier. Otherwise it is an object
/// holding every field that is not ignored under the scenario and not
/// aliased to `""`, keyed by alias, plus the instance's plain properties.
/// Formatters see the raw field value; `"FK"` fields always render as
/// identifiers.
///
/// A warning is logged when references had to be cut short and the bound is
/// within one level of the configured maximum, since the next level down
/// would have hit it anyway.
#[must_use]
pub fn to_plain(manager: &EntityManager, e: EntityRef, options: &SerializeOptions) -> Json {
    let bound = manager.config().effective_depth(options.depth);
    let mut serializer = Serializer {
        manager,
        bound,
        scenario: options.scenario.as_deref(),
        depth: 0,
        truncated: false,
    };
    let out = serializer.value(&Value::Entity(e));
    if serializer.truncated && bound + 1 >= manager.config().max_serialize_depth {
        warn!(
            "Serialization of {} stopped at the maximum depth of {}",
            e, bound
        );
    }
    out
}

/// Populates an instance from plain JSON. Returns the same instance.
///
/// Keys are matched against aliases first, then field names. Ignored fields
/// are skipped; parsers run before assignment. A scalar given for a
/// collection field is wrapped in a one-element array. Values of fields
/// referencing a registered type are resolved through
/// [`EntityManager::create`]. Unknown keys become plain properties, except
/// internal ones (prefixed `_` or `$`), and are only written when they differ.
pub fn from_plain(
    manager: &mut EntityManager,
    data: &Json,
    target: EntityRef,
    options: &DeserializeOptions,
) -> ModelResult<EntityRef> {
    let Some(map) = data.as_object() else {
        return Ok(target);
    };
    let type_name = manager.record(target)?.type_name.clone();
    let scenario = options
        .scenario
        .clone()
        .unwrap_or_else(|| manager.config().default_scenario.clone());

    for (key, raw) in map {
        let Some(field) = manager.registry().field_by_key(&type_name, key) else {
            if is_internal(key) {
                continue;
            }
            let value = Value::from_json(raw.clone());
            if manager.property(target, key) != Some(&value) {
                manager.set_property(target, key, value)?;
            }
            continue;
        };
        if field.ignore.applies(Some(scenario.as_str())) {
            continue;
        }

        let mut raw = match &field.parser {
            Some(parser) => parser(raw),
            None => raw.clone(),
        };
        if field.kind.is_collection() && !raw.is_array() && !raw.is_null() {
            warn!(
                "Field {}.{} expects a collection; wrapping {} in an array",
                type_name, field.name, raw
            );
            raw = Json::Array(vec![raw]);
        }

        let value = match &field.related {
            Some(related) if manager.registry().contains(related) => {
                resolve_related(manager, related, raw)?
            }
            Some(related) => {
                warn!(
                    "Field {}.{} references unregistered type '{}'; kept as plain data",
                    type_name, field.name, related
                );
                Value::from_json(raw)
            }
            None => Value::from_json(raw),
        };
        manager.put(target, &field.name, value)?;
    }
    Ok(target)
}

fn resolve_related(manager: &mut EntityManager, related: &str, raw: Json) -> ModelResult<Value> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Array(items) => {
            let mut resolved: Vec<Value> = Vec::with_capacity(items.len());
            for item in items.iter().filter(|item| !item.is_null()) {
                let entity = Value::Entity(manager.create(related, item)?);
                if !resolved.contains(&entity) {
                    resolved.push(entity);
                }
            }
            Ok(Value::List(resolved))
        }
        other => Ok(Value::Entity(manager.create(related, &other)?)),
    }
}
