use entigraph_model::{
    Cardinality, EntityManager, EntityRef, EntityType, Field, TypeRegistry, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count(m: &EntityManager, e: EntityRef, field: &str) -> usize {
    m.get(e, field).as_list().map_or(0, <[Value]>::len)
}

/// Owner.owns (collection) <-> Owned.owner (single).
fn one_to_many() -> EntityManager {
    let mut r = TypeRegistry::new();
    r.register(
        EntityType::new("Owner")
            .field(Field::text("name"))
            .field(Field::has_many("owns", "Owned", "owner")),
    );
    r.register(EntityType::new("Owned").field(Field::has_one("owner", "Owner", "owns")));
    EntityManager::new(r)
}

/// Owner.owns (collection) <-> Owned.owner (collection).
fn many_to_many() -> EntityManager {
    let mut r = TypeRegistry::new();
    r.register(EntityType::new("Owner").field(Field::has_many("owns", "Owned", "owner")));
    r.register(EntityType::new("Owned").field(Field::has_many("owner", "Owner", "owns")));
    EntityManager::new(r)
}

/// User.group (single) <-> Group.user (single).
fn one_to_one() -> EntityManager {
    let mut r = TypeRegistry::new();
    r.register(EntityType::new("User").field(Field::has_one("group", "Group", "user")));
    r.register(EntityType::new("Group").field(Field::has_one("user", "User", "group")));
    EntityManager::new(r)
}

// ── Derivation ───────────────────────────────────────────────────

#[test]
fn one_to_one_association_is_derived_from_nested_data() {
    init_tracing();
    let mut m = one_to_one();
    let user = m
        .create("User", &json!({"id": "u1", "group": {"id": "g1", "user": "u1"}}))
        .unwrap();
    let group = m.lookup("Group", "g1").unwrap();

    let user_assocs = m.associations(user);
    let group_assocs = m.associations(group);
    assert_eq!(user_assocs.len(), 1);
    assert_eq!(group_assocs.len(), 1);
    assert_eq!(user_assocs[0].id(), "User:group:Group:user");
    assert_eq!(group_assocs[0].id(), "Group:user:User:group");
    assert_eq!(user_assocs[0].cardinality, Cardinality::OneToOne);

    assert_eq!(m.get(user, "group"), Value::Entity(group));
    assert_eq!(m.get(group, "user"), Value::Entity(user));
}

#[test]
fn cardinality_follows_collection_sides() {
    let mut m = one_to_many();
    let owner = m.type_associations("Owner");
    let owned = m.type_associations("Owned");
    assert_eq!(owner[0].cardinality, Cardinality::OneToMany);
    assert_eq!(owner[0].cardinality.code(), "I_N");
    assert_eq!(owned[0].cardinality, Cardinality::ManyToOne);
    assert_eq!(owned[0].cardinality.code(), "N_I");

    let mut m = many_to_many();
    assert_eq!(m.type_associations("Owner")[0].cardinality, Cardinality::ManyToMany);
}

#[test]
fn associations_are_inherited_from_supertypes() {
    let mut r = TypeRegistry::new();
    r.register(
        EntityType::new("Related")
            .field(Field::reference("pSuper", "Superclass"))
            .field(Field::reference("pSub", "Sub")),
    );
    r.register(EntityType::new("Superclass").field(Field::has_one("pSuper", "Related", "pSuper")));
    r.register(
        EntityType::new("Sub")
            .extends("Superclass")
            .field(Field::has_one("pSub", "Related", "pSub")),
    );
    let mut m = EntityManager::new(r);

    let sup = m.create("Superclass", &json!({"id": 1})).unwrap();
    let sub = m.create("Sub", &json!({"id": 2})).unwrap();
    let related = m.create("Related", &json!({"id": 3})).unwrap();

    assert_eq!(m.associations(sup).len(), 1);
    assert_eq!(m.associations(sub).len(), 2);
    assert_eq!(m.associations(related).len(), 0);

    // The inherited association is live on the subtype.
    m.put(sub, "pSuper", related).unwrap();
    assert_eq!(m.get(related, "pSuper"), Value::Entity(sub));
}

#[test]
fn broken_declarations_are_skipped() {
    init_tracing();
    let mut r = TypeRegistry::new();
    r.register(
        EntityType::new("A")
            .field(Field::has_one("ghost", "Missing", "a"))
            .field(Field::has_one("b", "B", "nope"))
            .field(Field::reference("plain", "B")),
    );
    r.register(EntityType::new("B"));
    let mut m = EntityManager::new(r);

    assert!(m.type_associations("A").is_empty());
    let a = m.create("A", &json!({"id": 1})).unwrap();
    assert!(m.associations(a).is_empty());
}

#[test]
fn source_key_is_recorded_once_identified() {
    let mut m = one_to_one();
    let user = m.create("User", &json!({})).unwrap();
    assert_eq!(m.association_source_key(user, "User:group:Group:user"), None);

    m.put(user, "id", "u9").unwrap();
    assert_eq!(
        m.association_source_key(user, "User:group:Group:user"),
        Some("u9".into())
    );
}

// ── One-to-one ───────────────────────────────────────────────────

#[test]
fn one_to_one_reassignment_releases_previous_partner() {
    let mut m = one_to_one();
    let u1 = m
        .create("User", &json!({"id": "u1", "group": {"id": "g1"}}))
        .unwrap();
    let g1 = m.lookup("Group", "g1").unwrap();
    let u2 = m.create("User", &json!({"id": "u2"})).unwrap();

    m.put(u2, "group", g1).unwrap();

    assert_eq!(m.get(g1, "user"), Value::Entity(u2));
    assert_eq!(m.get(u2, "group"), Value::Entity(g1));
    assert_eq!(m.get(u1, "group"), Value::Null);
}

#[test]
fn one_to_one_null_out_clears_inverse() {
    let mut m = one_to_one();
    let u1 = m
        .create("User", &json!({"id": "u1", "group": {"id": "g1"}}))
        .unwrap();
    let g1 = m.lookup("Group", "g1").unwrap();

    m.put(g1, "user", Value::Null).unwrap();
    assert_eq!(m.get(u1, "group"), Value::Null);
}

// ── One-to-many ──────────────────────────────────────────────────

#[test]
fn owned_reassignment_moves_between_collections() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie", "owns": []})).unwrap();
    let bart = m.create("Owner", &json!({"id": "bart", "owns": []})).unwrap();
    let puppet = m
        .create("Owned", &json!({"id": "puppet", "owner": "maggie"}))
        .unwrap();

    assert_eq!(m.get(maggie, "owns"), Value::from(vec![puppet]));

    m.put(puppet, "owner", bart).unwrap();
    assert_eq!(count(&m, maggie, "owns"), 0);
    assert_eq!(m.get(bart, "owns"), Value::from(vec![puppet]));
    assert_eq!(m.get(puppet, "owner"), Value::Entity(bart));

    m.put(puppet, "owner", Value::Null).unwrap();
    assert_eq!(count(&m, bart, "owns"), 0);
}

#[test]
fn pushing_into_collection_sets_single_inverse() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie"})).unwrap();
    let bart = m.create("Owner", &json!({"id": "bart"})).unwrap();
    let puppet = m.create("Owned", &json!({"id": "puppet"})).unwrap();

    m.push(maggie, "owns", puppet).unwrap();
    assert_eq!(m.get(puppet, "owner"), Value::Entity(maggie));

    // Taking it over from another owner's side.
    m.push(bart, "owns", puppet).unwrap();
    assert_eq!(m.get(puppet, "owner"), Value::Entity(bart));
    assert_eq!(count(&m, maggie, "owns"), 0);
}

#[test]
fn splice_removal_nulls_single_inverse() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie"})).unwrap();
    let puppet = m
        .create("Owned", &json!({"id": "puppet", "owner": "maggie"}))
        .unwrap();

    let removed = m.remove_item(maggie, "owns", &Value::Entity(puppet)).unwrap();
    assert!(removed);
    assert_eq!(m.get(puppet, "owner"), Value::Null);
}

#[test]
fn replacing_collection_wholesale_updates_both_sides() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie"})).unwrap();
    let a = m.create("Owned", &json!({"id": "a", "owner": "maggie"})).unwrap();
    let b = m.create("Owned", &json!({"id": "b"})).unwrap();

    m.put(maggie, "owns", vec![b]).unwrap();
    assert_eq!(m.get(a, "owner"), Value::Null);
    assert_eq!(m.get(b, "owner"), Value::Entity(maggie));
}

// ── Many-to-many ─────────────────────────────────────────────────

fn simpsons(m: &mut EntityManager) -> [EntityRef; 4] {
    let maggie = m
        .create("Owner", &json!({"id": "maggie", "owns": ["puppet1", "puppet2"]}))
        .unwrap();
    let bart = m
        .create("Owner", &json!({"id": "bart", "owns": ["puppet2"]}))
        .unwrap();
    let puppet1 = m
        .create("Owned", &json!({"id": "puppet1", "owner": ["maggie"]}))
        .unwrap();
    let puppet2 = m
        .create("Owned", &json!({"id": "puppet2", "owner": ["maggie", "bart"]}))
        .unwrap();
    [maggie, bart, puppet1, puppet2]
}

#[test]
fn many_to_many_setup_is_consistent() {
    let mut m = many_to_many();
    let [maggie, bart, puppet1, puppet2] = simpsons(&mut m);
    assert_eq!(count(&m, maggie, "owns"), 2);
    assert_eq!(count(&m, bart, "owns"), 1);
    assert_eq!(count(&m, puppet1, "owner"), 1);
    assert_eq!(count(&m, puppet2, "owner"), 2);
}

#[test]
fn many_to_many_reassignment() {
    let mut m = many_to_many();
    let [maggie, bart, puppet1, puppet2] = simpsons(&mut m);

    m.put(puppet2, "owner", vec![bart]).unwrap();

    assert_eq!(count(&m, maggie, "owns"), 1);
    assert_eq!(count(&m, bart, "owns"), 1);
    assert_eq!(count(&m, puppet1, "owner"), 1);
    assert_eq!(count(&m, puppet2, "owner"), 1);
    assert!(!m.get(maggie, "owns").references(puppet2));
}

#[test]
fn many_to_many_null_out_and_restore() {
    let mut m = many_to_many();
    let [maggie, bart, puppet1, puppet2] = simpsons(&mut m);

    m.put(puppet2, "owner", Value::Null).unwrap();
    assert_eq!(count(&m, maggie, "owns"), 1);
    assert_eq!(count(&m, bart, "owns"), 0);
    assert_eq!(count(&m, puppet1, "owner"), 1);
    assert_eq!(count(&m, puppet2, "owner"), 0);

    m.put(puppet2, "owner", vec![maggie, bart]).unwrap();
    assert_eq!(count(&m, maggie, "owns"), 2);
    assert_eq!(count(&m, bart, "owns"), 1);
    assert_eq!(count(&m, puppet1, "owner"), 1);
    assert_eq!(count(&m, puppet2, "owner"), 2);
}

#[test]
fn respliced_element_keeps_its_inverse() {
    let mut m = many_to_many();
    let [maggie, _, puppet1, _] = simpsons(&mut m);

    // Removing and re-inserting the same element must not unlink it.
    m.splice(maggie, "owns", 0, 1, vec![Value::Entity(puppet1)]).unwrap();
    assert!(m.get(puppet1, "owner").references(maggie));
    assert!(m.get(maggie, "owns").references(puppet1));
}

// ── Removal ──────────────────────────────────────────────────────

#[test]
fn removing_owned_empties_owner_collection() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie"})).unwrap();
    let puppet = m
        .create("Owned", &json!({"id": "puppet", "owner": "maggie"}))
        .unwrap();

    m.remove(puppet).unwrap();

    assert!(m.is_removed(puppet));
    assert_eq!(count(&m, maggie, "owns"), 0);
}

#[test]
fn removing_owner_nulls_every_owned() {
    let mut m = one_to_many();
    let maggie = m.create("Owner", &json!({"id": "maggie"})).unwrap();
    let a = m.create("Owned", &json!({"id": "a", "owner": "maggie"})).unwrap();
    let b = m.create("Owned", &json!({"id": "b", "owner": "maggie"})).unwrap();

    m.remove(maggie).unwrap();
    assert_eq!(m.get(a, "owner"), Value::Null);
    assert_eq!(m.get(b, "owner"), Value::Null);
}

#[test]
fn removing_in_many_to_many_unlinks_all_partners() {
    let mut m = many_to_many();
    let [maggie, bart, puppet1, puppet2] = simpsons(&mut m);

    m.remove(puppet2).unwrap();
    assert!(!m.get(maggie, "owns").references(puppet2));
    assert!(!m.get(bart, "owns").references(puppet2));
    assert!(m.get(maggie, "owns").references(puppet1));
}

#[test]
fn removing_with_empty_source_is_a_no_op() {
    let mut m = one_to_one();
    let user = m.create("User", &json!({"id": "lonely"})).unwrap();
    m.remove(user).unwrap();
    assert!(m.is_removed(user));
    assert!(m.is_attached(user));
}
