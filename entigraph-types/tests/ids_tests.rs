use entigraph_types::{ContextId, EntityRef, Identifier, Identity};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::str::FromStr;

// ── ContextId ────────────────────────────────────────────────────

#[test]
fn context_ids_are_unique() {
    let ids: HashSet<ContextId> = (0..100).map(|_| ContextId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn context_id_display_roundtrips_through_from_str() {
    let id = ContextId::new();
    let parsed = ContextId::from_str(&id.to_string()).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn context_id_from_str_rejects_garbage() {
    assert!(ContextId::from_str("not-a-uuid").is_err());
}

// ── EntityRef ────────────────────────────────────────────────────

#[test]
fn entity_refs_compare_by_context_and_slot() {
    let ctx = ContextId::new();
    let other = ContextId::new();
    assert_eq!(EntityRef::new(ctx, 3), EntityRef::new(ctx, 3));
    assert_ne!(EntityRef::new(ctx, 3), EntityRef::new(ctx, 4));
    assert_ne!(EntityRef::new(ctx, 3), EntityRef::new(other, 3));
}

#[test]
fn entity_ref_accessors() {
    let ctx = ContextId::new();
    let e = EntityRef::new(ctx, 7);
    assert_eq!(e.context(), ctx);
    assert_eq!(e.index(), 7);
    assert_eq!(e.to_string(), "#7");
    assert_eq!(e.generation(), 0);
}

#[test]
fn reused_slots_get_distinct_handles() {
    let ctx = ContextId::new();
    let first = EntityRef::new(ctx, 2);
    let second = EntityRef::with_generation(ctx, 2, 1);
    assert_ne!(first, second);
    assert_eq!(second.index(), first.index());
    assert_eq!(second.to_string(), "#2v1");
}

// ── Identifier ───────────────────────────────────────────────────

#[test]
fn empty_identifier_is_anonymous() {
    assert_eq!(Identifier::new(""), None);
    assert!(Identifier::new("a").is_some());
}

#[test]
fn numeric_and_string_identifiers_coincide() {
    assert_eq!(Identifier::from(1), Identifier::from("1"));
    assert_eq!(
        Identifier::from_json(&json!(1)),
        Identifier::from_json(&json!("1"))
    );
}

#[test]
fn integral_floats_identify_like_integers() {
    assert_eq!(Identifier::from_json(&json!(1.0)), Some(Identifier::from(1)));
    assert_eq!(Identifier::from_json(&json!(-3.0)), Some(Identifier::from("-3")));
    assert_eq!(Identifier::from_json(&json!(1.5)), Some(Identifier::from("1.5")));
}

#[test]
fn zero_is_a_valid_identifier() {
    assert_eq!(Identifier::from_json(&json!(0)), Some(Identifier::from("0")));
}

#[test]
fn composite_json_has_no_identifier() {
    assert_eq!(Identifier::from_json(&json!(null)), None);
    assert_eq!(Identifier::from_json(&json!([1])), None);
    assert_eq!(Identifier::from_json(&json!({"id": 1})), None);
    assert_eq!(Identifier::from_json(&json!("")), None);
}

#[test]
fn try_from_json_reports_invalid_identifier() {
    let err = Identifier::try_from(&json!({"id": 1})).unwrap_err();
    assert!(err.to_string().contains("invalid identifier"));
}

#[test]
fn identifier_serializes_as_plain_string() {
    let id = Identifier::from("maggie");
    assert_eq!(serde_json::to_value(&id).unwrap(), json!("maggie"));
    let back: Identifier = serde_json::from_value(json!("maggie")).unwrap();
    assert_eq!(back, id);
}

// ── Identity ─────────────────────────────────────────────────────

#[test]
fn identity_display() {
    let named = Identity::new("Owner", Some(Identifier::from("maggie")));
    let anonymous = Identity::new("Owner", None);
    assert_eq!(named.to_string(), "Owner:maggie");
    assert_eq!(anonymous.to_string(), "Owner:<anonymous>");
    assert!(anonymous.is_anonymous());
    assert!(!named.is_anonymous());
}

#[test]
fn identities_differ_by_type() {
    let id = Some(Identifier::from(1));
    assert_ne!(Identity::new("User", id.clone()), Identity::new("Group", id));
}
