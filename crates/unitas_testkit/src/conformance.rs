//! Behaviour every entity store must show when driven through units of work.
//!
//! Each check opens its own fixture. Stores that do not track versions are
//! held to the same suite, except that conflicts are expected to go
//! undetected.

use crate::fixtures::{StoreFixture, StoreKind};
use crate::model::{Assembly, Part, Thing};
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use unitas_core::{
    CoreError, Entity, EntityReference, EntityStatus, EntityStore, Identity, Value,
};

/// Runs every check against a store kind.
pub fn run_all(kind: StoreKind) {
    round_trip(kind);
    removed_entity_cannot_be_found(kind);
    unmodified_entity_keeps_version(kind);
    modified_property_changes_version(kind);
    modified_association_changes_version(kind);
    concurrent_modification_is_detected(kind);
    concurrent_removal_is_detected(kind);
    discard_leaves_store_untouched(kind);
    read_only_completion_skips_store(kind);
    rename_scenario(kind);
    cascade_removes_aggregated_entities(kind);
    cascade_handles_shared_and_cyclic_parts(kind);
    entity_states_are_fresh_and_restartable(kind);
    failed_batch_is_atomic(kind);
    many_association_order_is_preserved(kind);
    named_association_overwrites(kind);
    if kind.is_durable() {
        data_survives_reopen(kind);
    }
}

fn new_thing(fixture: &StoreFixture, id: &str, name: &str) -> EntityReference {
    let uow = fixture.uow();
    let thing: Thing = uow.new_entity(Some(Identity::new(id))).unwrap();
    thing.set_name(name).unwrap();
    uow.complete().unwrap();
    thing.reference()
}

fn version(fixture: &StoreFixture, reference: &EntityReference) -> unitas_core::Version {
    fixture.uow().version_of(reference).unwrap()
}

/// Committed properties and associations read back unchanged.
pub fn round_trip(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    let attributes = BTreeMap::from([
        ("colour".to_string(), Value::from("red")),
        ("size".to_string(), Value::Integer(3)),
    ]);

    let uow = fixture.uow();
    let a: Thing = uow.new_entity(Some(Identity::new("a"))).unwrap();
    let b: Thing = uow.new_entity(Some(Identity::new("b"))).unwrap();
    let c: Thing = uow.new_entity(Some(Identity::new("c"))).unwrap();
    let builder = uow.new_entity_builder::<Thing>(Some(Identity::new("main"))).unwrap();
    builder.instance().set_serial("SN-1").unwrap();
    let main = builder.new_instance().unwrap();
    main.set_name("main").unwrap();
    main.set_count(-42).unwrap();
    main.set_active(true).unwrap();
    main.set_created(Some(created)).unwrap();
    main.set_value("tags", Value::List(vec![Value::from("x"), Value::from("y")]))
        .unwrap();
    main.set_value("attributes", Value::Map(attributes.clone())).unwrap();
    main.partner().set(Some(&a)).unwrap();
    main.friends().push(&b).unwrap();
    main.friends().push(&c).unwrap();
    main.friends().push(&b).unwrap();
    main.labeled().put("first", &a).unwrap();
    main.labeled().put("second", &c).unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let main: Thing = uow.get(&EntityReference::parse("main")).unwrap();
    assert_eq!(main.handle().status(), EntityStatus::Loaded, "{kind:?}");
    assert_eq!(main.name().unwrap(), "main");
    assert_eq!(main.count().unwrap(), -42);
    assert!(main.active().unwrap());
    assert_eq!(main.created().unwrap(), Some(created));
    assert_eq!(main.serial().unwrap().as_deref(), Some("SN-1"));
    assert_eq!(
        main.value("tags").unwrap(),
        Value::List(vec![Value::from("x"), Value::from("y")])
    );
    assert_eq!(main.value("attributes").unwrap(), Value::Map(attributes));
    assert_eq!(
        main.partner().get(&uow).unwrap().map(|t| t.reference()),
        Some(EntityReference::parse("a"))
    );
    assert_eq!(
        main.friends().references().unwrap(),
        vec![
            EntityReference::parse("b"),
            EntityReference::parse("c"),
            EntityReference::parse("b")
        ]
    );
    assert_eq!(
        main.labeled().references().unwrap(),
        BTreeMap::from([
            ("first".to_string(), EntityReference::parse("a")),
            ("second".to_string(), EntityReference::parse("c")),
        ])
    );
    // loading main did not load its targets
    assert_eq!(main.handle().status(), EntityStatus::Loaded);
}

/// A removed entity is gone for later sessions.
pub fn removed_entity_cannot_be_found(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "gone", "x");

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    uow.remove(&thing).unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let err = uow.get::<Thing>(&reference).unwrap_err();
    assert!(err.is_no_such_entity(), "{kind:?}: {err}");
}

/// Reading an entity does not change its version.
pub fn unmodified_entity_keeps_version(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "steady", "x");
    let before = version(&fixture, &reference);

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    assert_eq!(thing.name().unwrap(), "x");
    uow.complete().unwrap();

    assert_eq!(version(&fixture, &reference), before, "{kind:?}");
}

/// Writing a property yields a new version on versioning stores.
pub fn modified_property_changes_version(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "p", "x");
    let before = version(&fixture, &reference);

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    thing.set_count(7).unwrap();
    uow.complete().unwrap();

    let after = version(&fixture, &reference);
    if kind.tracks_versions() {
        assert_ne!(after, before, "{kind:?}");
    } else {
        assert!(after.is_empty() && before.is_empty(), "{kind:?}");
    }
}

/// Writing an association yields a new version on versioning stores.
pub fn modified_association_changes_version(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "owner", "x");
    let friend = new_thing(&fixture, "friend", "y");
    let before = version(&fixture, &reference);

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    let friend: Thing = uow.get(&friend).unwrap();
    thing.friends().push(&friend).unwrap();
    uow.complete().unwrap();

    if kind.tracks_versions() {
        assert_ne!(version(&fixture, &reference), before, "{kind:?}");
    }
    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    assert_eq!(thing.friends().count().unwrap(), 1);
}

/// Two sessions updating the same entity: the second to complete fails on
/// versioning stores and wins on the others.
pub fn concurrent_modification_is_detected(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "shared", "initial");

    let first = fixture.uow();
    let second = fixture.uow();
    let a: Thing = first.get(&reference).unwrap();
    let b: Thing = second.get(&reference).unwrap();
    a.set_name("first").unwrap();
    b.set_name("second").unwrap();
    first.complete().unwrap();

    let result = second.complete();
    let expected = if kind.tracks_versions() {
        let err = result.unwrap_err();
        assert!(err.is_concurrent_modification(), "{kind:?}: {err}");
        match err {
            CoreError::ConcurrentEntityModification { references } => {
                assert_eq!(references, vec![reference.clone()]);
            }
            other => panic!("{kind:?}: unexpected {other}"),
        }
        assert!(second.is_open());
        second.discard();
        "first"
    } else {
        result.unwrap();
        "second"
    };

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    assert_eq!(thing.name().unwrap(), expected, "{kind:?}");
}

/// Updating an entity another session removed conflicts on versioning stores.
pub fn concurrent_removal_is_detected(kind: StoreKind) {
    if !kind.tracks_versions() {
        return;
    }
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "doomed", "x");

    let remover = fixture.uow();
    let writer = fixture.uow();
    let doomed: Thing = remover.get(&reference).unwrap();
    let written: Thing = writer.get(&reference).unwrap();
    remover.remove(&doomed).unwrap();
    remover.complete().unwrap();

    written.set_count(1).unwrap();
    assert!(writer.complete().unwrap_err().is_concurrent_modification());
}

/// A discarded session leaves the stored entity exactly as it was.
pub fn discard_leaves_store_untouched(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "stable", "before");
    let before = version(&fixture, &reference);
    let applied = fixture.store.apply_count();

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    thing.set_name("changed").unwrap();
    thing.set_count(99).unwrap();
    let _extra: Thing = uow.new_entity(Some(Identity::new("extra"))).unwrap();
    uow.discard();
    assert_eq!(fixture.store.apply_count(), applied);

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    assert_eq!(thing.name().unwrap(), "before");
    assert_eq!(thing.count().unwrap(), 0);
    assert_eq!(version(&fixture, &reference), before);
    assert!(uow.get::<Thing>(&EntityReference::parse("extra")).is_err());
}

/// A session that only reads completes without entering the write path.
pub fn read_only_completion_skips_store(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "r", "x");
    let applied = fixture.store.apply_count();

    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    let _ = thing.name().unwrap();
    let _ = thing.friends().references().unwrap();
    uow.complete().unwrap();
    assert_eq!(fixture.store.apply_count(), applied, "{kind:?}");
}

/// Create E1 named "A", rename it to "B" in a second session, read "B" in a
/// third.
pub fn rename_scenario(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "E1", "A");
    let first_version = version(&fixture, &reference);

    let uow = fixture.uow();
    let e1: Thing = uow.get(&reference).unwrap();
    e1.set_name("B").unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let e1: Thing = uow.get(&reference).unwrap();
    assert_eq!(e1.name().unwrap(), "B");
    if kind.tracks_versions() {
        assert_ne!(e1.handle().version(), first_version, "{kind:?}");
    }
}

/// Removing an assembly removes its frame, both parts and its spare, and
/// nothing else.
pub fn cascade_removes_aggregated_entities(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let uow = fixture.uow();
    let assembly: Assembly = uow.new_entity(Some(Identity::new("asm"))).unwrap();
    let frame: Part = uow.new_entity(None).unwrap();
    let left: Part = uow.new_entity(None).unwrap();
    let right: Part = uow.new_entity(None).unwrap();
    let spare: Part = uow.new_entity(None).unwrap();
    let supplier: Part = uow.new_entity(Some(Identity::new("supplier"))).unwrap();
    assembly.frame().set(Some(&frame)).unwrap();
    assembly.parts().push(&left).unwrap();
    assembly.parts().push(&right).unwrap();
    assembly.spares().put("wheel", &spare).unwrap();
    assembly.supplier().set(Some(&supplier)).unwrap();
    uow.complete().unwrap();
    assert_eq!(fixture.store.entity_states().unwrap().count(), 6);

    let states_before = fixture.store.state_count();
    let uow = fixture.uow();
    let assembly: Assembly = uow.get(&EntityReference::parse("asm")).unwrap();
    uow.remove(&assembly).unwrap();
    uow.complete().unwrap();
    assert_eq!(fixture.store.state_count() - states_before, 5, "{kind:?}");

    let remaining: Vec<_> = fixture
        .store
        .entity_states()
        .unwrap()
        .map(|s| s.unwrap().reference().clone())
        .collect();
    assert_eq!(remaining, vec![EntityReference::parse("supplier")], "{kind:?}");
}

/// Parts shared between associations, and parts owning each other, are
/// removed once.
pub fn cascade_handles_shared_and_cyclic_parts(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let uow = fixture.uow();
    let assembly: Assembly = uow.new_entity(Some(Identity::new("asm"))).unwrap();
    let p1: Part = uow.new_entity(None).unwrap();
    let p2: Part = uow.new_entity(None).unwrap();
    assembly.frame().set(Some(&p1)).unwrap();
    assembly.parts().push(&p1).unwrap();
    assembly.spares().put("s", &p2).unwrap();
    p1.subparts().push(&p2).unwrap();
    p2.subparts().push(&p1).unwrap();
    uow.complete().unwrap();

    let states_before = fixture.store.state_count();
    let uow = fixture.uow();
    uow.remove_reference(&EntityReference::parse("asm")).unwrap();
    uow.complete().unwrap();
    assert_eq!(fixture.store.state_count() - states_before, 3, "{kind:?}");
    assert_eq!(fixture.store.entity_states().unwrap().count(), 0);
}

/// Enumeration yields freshly loaded states and can be repeated.
pub fn entity_states_are_fresh_and_restartable(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    for id in ["x", "y", "z"] {
        new_thing(&fixture, id, id);
    }
    let mut names: Vec<String> = fixture
        .store
        .entity_states()
        .unwrap()
        .map(|state| {
            let state = state.unwrap();
            assert_eq!(state.status(), EntityStatus::Loaded);
            state.reference().to_string()
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["x", "y", "z"]);

    let mut partial = fixture.store.entity_states().unwrap();
    assert!(partial.next().is_some());
    drop(partial);
    assert_eq!(fixture.store.entity_states().unwrap().count(), 3);
}

/// A batch that fails validation writes none of its states.
pub fn failed_batch_is_atomic(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    new_thing(&fixture, "taken", "x");

    let uow = fixture.uow();
    let _fresh: Thing = uow.new_entity(Some(Identity::new("fresh"))).unwrap();
    uow.new_entity_state(Some(EntityReference::parse("taken")), Thing::TYPE_NAME)
        .unwrap();
    let err = uow.complete().unwrap_err();
    assert!(matches!(err, CoreError::UnitOfWorkCompletion { .. }), "{kind:?}: {err}");
    uow.discard();

    let uow = fixture.uow();
    assert!(uow
        .get::<Thing>(&EntityReference::parse("fresh"))
        .unwrap_err()
        .is_no_such_entity());
    assert_eq!(fixture.store.entity_states().unwrap().count(), 1);
}

/// Many-association order, including inserts in the middle, survives a
/// round trip.
pub fn many_association_order_is_preserved(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
    let items: Vec<Thing> = (0..4)
        .map(|i| uow.new_entity(Some(Identity::new(format!("i{i}")))).unwrap())
        .collect();
    owner.friends().push(&items[0]).unwrap();
    owner.friends().push(&items[1]).unwrap();
    owner.friends().add(1, &items[2]).unwrap();
    owner.friends().add(0, &items[3]).unwrap();
    owner.friends().remove(&items[1]).unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
    let order: Vec<String> = owner
        .friends()
        .iter(&uow)
        .unwrap()
        .map(|t| t.unwrap().reference().to_string())
        .collect();
    assert_eq!(order, vec!["i3", "i0", "i2"], "{kind:?}");
}

/// `put` overwrites silently and reports it; `name_of` finds the name.
pub fn named_association_overwrites(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
    let a: Thing = uow.new_entity(None).unwrap();
    let b: Thing = uow.new_entity(None).unwrap();
    assert!(!owner.labeled().put("slot", &a).unwrap());
    assert!(owner.labeled().put("slot", &b).unwrap());
    uow.complete().unwrap();

    let uow = fixture.uow();
    let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
    let labeled = owner.labeled();
    assert_eq!(labeled.count().unwrap(), 1);
    let b: Thing = uow.get(&b.reference()).unwrap();
    let a: Thing = uow.get(&a.reference()).unwrap();
    assert_eq!(labeled.name_of(&b).unwrap().as_deref(), Some("slot"));
    assert_eq!(labeled.name_of(&a).unwrap(), None);
}

/// Committed data is visible after closing and reopening the store.
pub fn data_survives_reopen(kind: StoreKind) {
    let fixture = StoreFixture::new(kind);
    let reference = new_thing(&fixture, "kept", "durable");
    let before = version(&fixture, &reference);

    let fixture = fixture.reopen();
    let uow = fixture.uow();
    let thing: Thing = uow.get(&reference).unwrap();
    assert_eq!(thing.name().unwrap(), "durable");
    assert_eq!(thing.handle().version(), before);
}
