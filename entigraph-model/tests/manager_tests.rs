use entigraph_model::{
    ChangeRecord, EntityManager, EntityType, Field, Identifier, ModelError, TypeRegistry, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn registry() -> TypeRegistry {
    let mut r = TypeRegistry::new();
    r.register(
        EntityType::new("User")
            .field(Field::text("name"))
            .field(Field::has_one("group", "Group", "user")),
    );
    r.register(EntityType::new("Group").field(Field::has_one("user", "User", "group")));
    r.register(
        EntityType::new("Customer")
            .id_field("custId")
            .field(Field::text("name")),
    );
    r
}

fn manager() -> EntityManager {
    EntityManager::new(registry())
}

// ── Identity ─────────────────────────────────────────────────────

#[test]
fn create_returns_the_attached_instance() {
    let mut m = manager();
    let a = m.create("User", &json!({"id": 1, "name": "Homer"})).unwrap();
    let b = m.create("User", &json!({"id": 1})).unwrap();
    assert_eq!(a, b);
    assert_eq!(m.instances("User").len(), 1);
}

#[test]
fn numeric_and_string_ids_are_one_identity() {
    let mut m = manager();
    let a = m.create("User", &json!({"id": 1})).unwrap();
    let b = m.create("User", &json!({"id": "1"})).unwrap();
    let c = m.create("User", &json!(1)).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(m.lookup("User", 1), Some(a));
    assert_eq!(m.lookup("User", "1"), Some(a));
}

#[test]
fn identities_are_scoped_by_type() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    let group = m.create("Group", &json!({"id": 1})).unwrap();
    assert_ne!(user, group);
}

#[test]
fn create_merges_into_existing_instance_and_leaves_it_clean() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1, "name": "Homer"})).unwrap();
    m.put(user, "name", "Bart").unwrap();
    assert!(m.is_dirty(user));

    let again = m.create("User", &json!({"id": 1, "name": "Lisa"})).unwrap();
    assert_eq!(again, user);
    assert_eq!(m.get(user, "name"), Value::from("Lisa"));
    assert!(!m.is_dirty(user));
}

#[test]
fn custom_identifier_field() {
    let mut m = manager();
    let c = m.create("Customer", &json!({"custId": "c-7", "name": "Ned"})).unwrap();
    assert_eq!(m.identifier(c), Some(Identifier::from("c-7")));
    assert_eq!(m.lookup("Customer", "c-7"), Some(c));
    assert_eq!(m.identity(c).unwrap().to_string(), "Customer:c-7");
}

#[test]
fn zero_is_a_valid_identifier() {
    let mut m = manager();
    let zero = m.create("User", &json!({"id": 0})).unwrap();
    assert_eq!(m.lookup("User", 0), Some(zero));
}

#[test]
fn anonymous_instances_are_distinct() {
    let mut m = manager();
    let a = m.create("User", &json!({"name": "x"})).unwrap();
    let b = m.create("User", &json!({"name": "x"})).unwrap();
    let c = m.create("User", &json!({"id": ""})).unwrap();
    assert_ne!(a, b);
    assert_ne!(b, c);
    assert!(m.is_attached(a));
    assert_eq!(m.identifier(a), None);
    assert_eq!(m.lookup_instance(a), None);
    assert_eq!(m.instances("User"), vec![a, b, c]);
}

#[test]
fn unknown_type_is_an_error_for_create_and_none_for_lookup() {
    let mut m = manager();
    let err = m.create("Nope", &json!({"id": 1})).unwrap_err();
    assert!(matches!(err, ModelError::UnknownType(ref t) if t == "Nope"));
    assert_eq!(m.lookup("Nope", 1), None);
}

// ── Attach / detach ──────────────────────────────────────────────

#[test]
fn detach_is_idempotent() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    m.detach(user);
    m.detach(user);
    assert!(!m.is_attached(user));
    assert_eq!(m.lookup("User", 1), None);

    // A new instance may now take the identity.
    let other = m.create("User", &json!({"id": 1})).unwrap();
    assert_ne!(other, user);
}

#[test]
fn attach_again_after_detach() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    m.detach(user);
    assert!(m.attach(user));
    assert_eq!(m.lookup("User", 1), Some(user));
    assert_eq!(m.lookup_instance(user), Some(user));
}

#[test]
fn attach_refuses_a_taken_identity() {
    let mut m = manager();
    let first = m.create("User", &json!({"id": 1})).unwrap();
    m.detach(first);
    let second = m.create("User", &json!({"id": 1})).unwrap();

    assert!(!m.attach(first));
    assert!(!m.is_attached(first));
    assert_eq!(m.lookup("User", 1), Some(second));
}

#[test]
fn assigning_the_identifier_rekeys() {
    let mut m = manager();
    let user = m.create("User", &json!({"name": "anon"})).unwrap();
    m.put(user, "id", "z").unwrap();
    assert_eq!(m.lookup("User", "z"), Some(user));

    m.put(user, "id", "y").unwrap();
    assert_eq!(m.lookup("User", "z"), None);
    assert_eq!(m.lookup("User", "y"), Some(user));
    assert_eq!(m.instances("User"), vec![user]);
}

#[test]
fn rekeying_onto_a_taken_identity_detaches() {
    let mut m = manager();
    let a = m.create("User", &json!({"id": "a"})).unwrap();
    let b = m.create("User", &json!({"id": "b"})).unwrap();

    m.put(b, "id", "a").unwrap();
    assert_eq!(m.lookup("User", "a"), Some(a));
    assert_eq!(m.lookup("User", "b"), None);
    assert!(!m.is_attached(b));
}

#[test]
fn clear_drops_every_instance() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1, "name": "Homer"})).unwrap();
    m.create("Group", &json!({"id": 2})).unwrap();
    m.clear();

    assert!(m.instances("User").is_empty());
    assert_eq!(m.lookup("User", 1), None);
    assert!(!m.is_attached(user));
    assert!(!m.contains(user));
    assert!(m.is_destroyed(user));
    assert_eq!(m.get(user, "name"), Value::Null);
    assert!(m.is_empty());
    assert_eq!(m.slot_count(), 2);

    let again = m.create("User", &json!({"id": 1})).unwrap();
    assert_ne!(again, user);
    assert_eq!(m.get(again, "name"), Value::Null);
    assert_eq!(m.slot_count(), 2);
}

#[test]
fn clear_keeps_type_and_model_subscriptions() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    m.subscribe(user, "name", |_, _| {});
    m.subscribe_entity(user, |_, _| {});
    let seen = Rc::new(RefCell::new(0));
    let by_type = seen.clone();
    m.subscribe_type("User", "name", move |_, _| *by_type.borrow_mut() += 1);
    let by_model = seen.clone();
    m.subscribe_model(move |_, _| *by_model.borrow_mut() += 1);

    m.clear();
    assert_eq!(m.subscription_count(), 2);

    let again = m.create("User", &json!({"id": 1})).unwrap();
    *seen.borrow_mut() = 0;
    m.put(again, "name", "Bart").unwrap();
    assert_eq!(*seen.borrow(), 2);
}

#[test]
fn integral_float_ids_share_one_instance() {
    let mut m = manager();
    let a = m.create("User", &json!({"id": 1})).unwrap();
    let b = m.create("User", &json!({"id": 1.0})).unwrap();
    assert_eq!(a, b);
    assert_eq!(m.lookup("User", "1"), Some(a));
    assert_eq!(m.len(), 1);
}

#[test]
fn handles_from_another_context_are_rejected() {
    let mut m1 = manager();
    let mut m2 = manager();
    let foreign = m2.create("User", &json!({"id": 1, "name": "x"})).unwrap();

    assert!(!m1.contains(foreign));
    assert_eq!(m1.get(foreign, "name"), Value::Null);
    assert!(matches!(
        m1.put(foreign, "name", "y").unwrap_err(),
        ModelError::ForeignEntity(_)
    ));
    assert!(!m1.attach(foreign));
    assert_ne!(m1.id(), m2.id());
}

// ── Modified entities ────────────────────────────────────────────

#[test]
fn modified_entities_partitions_pending_changes() {
    let mut m = manager();
    let fresh = m.create("User", &json!({"name": "new"})).unwrap();
    let clean = m.create("User", &json!({"id": 1, "name": "a"})).unwrap();
    let changed = m.create("User", &json!({"id": 2, "name": "b"})).unwrap();
    let gone = m.create("User", &json!({"id": 3, "name": "c"})).unwrap();
    m.create("Group", &json!({})).unwrap();

    m.put(changed, "name", "B").unwrap();
    m.remove(gone).unwrap();

    let modified = m.modified_entities(Some("User"));
    assert_eq!(modified.created, vec![fresh]);
    assert_eq!(modified.updated, vec![changed]);
    assert_eq!(modified.removed, vec![gone]);
    assert!(!modified.updated.contains(&clean));

    let all = m.modified_entities(None);
    assert_eq!(all.created.len(), 2);
}

#[test]
fn nothing_modified_after_creation() {
    let mut m = manager();
    m.create("User", &json!({"id": 1, "name": "a"})).unwrap();
    assert!(m.modified_entities(None).is_empty());
}

// ── Subscriptions ────────────────────────────────────────────────

fn recorder() -> (Rc<RefCell<Vec<ChangeRecord>>>, impl Fn(&mut EntityManager, &ChangeRecord)) {
    let seen: Rc<RefCell<Vec<ChangeRecord>>> = Rc::default();
    let sink = seen.clone();
    (seen, move |_: &mut EntityManager, r: &ChangeRecord| sink.borrow_mut().push(r.clone()))
}

#[test]
fn change_records_reach_every_topic() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1, "name": "Homer"})).unwrap();
    let other = m.create("User", &json!({"id": 2})).unwrap();

    let (field_seen, field_cb) = recorder();
    let (entity_seen, entity_cb) = recorder();
    let (type_seen, type_cb) = recorder();
    let (model_seen, model_cb) = recorder();
    m.subscribe(user, "name", field_cb);
    m.subscribe_entity(user, entity_cb);
    m.subscribe_type("User", "name", type_cb);
    m.subscribe_model(model_cb);

    m.put(user, "name", "Bart").unwrap();
    m.put(other, "name", "Lisa").unwrap();

    assert_eq!(field_seen.borrow().len(), 1);
    assert_eq!(entity_seen.borrow().len(), 1);
    assert_eq!(type_seen.borrow().len(), 2);
    assert_eq!(model_seen.borrow().len(), 2);

    let record = &field_seen.borrow()[0];
    assert!(record.is_update());
    assert_eq!(record.object, user);
    assert_eq!(record.old_value, Some(Value::from("Homer")));
}

#[test]
fn unsubscribe_stops_delivery() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    let (seen, cb) = recorder();
    let id = m.subscribe(user, "name", cb);

    m.put(user, "name", "a").unwrap();
    assert!(m.unsubscribe(id));
    assert!(!m.unsubscribe(id));
    m.put(user, "name", "b").unwrap();

    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn listeners_may_write_back() {
    let mut m = manager();
    let user = m.create("User", &json!({"id": 1})).unwrap();
    let group = m.create("Group", &json!({"id": 2, "name": "x"})).unwrap();
    m.subscribe(user, "name", move |m: &mut EntityManager, r: &ChangeRecord| {
        let name = m.get(r.object, "name");
        m.set_property(group, "lastUserName", name).unwrap();
    });

    m.put(user, "name", "Homer").unwrap();
    assert_eq!(m.property(group, "lastUserName"), Some(&Value::from("Homer")));
}
