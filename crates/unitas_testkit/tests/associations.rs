//! Association views over live sessions.

use unitas_core::{CoreError, Entity, EntityReference, Identity};
use unitas_testkit::{for_each_store, StoreFixture, StoreKind, Thing};

#[test]
fn single_association_resolves_lazily() {
    for_each_store(|fixture| {
        let uow = fixture.uow();
        let owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
        let partner: Thing = uow.new_entity(Some(Identity::new("partner"))).unwrap();
        partner.set_name("p").unwrap();
        owner.partner().set(Some(&partner)).unwrap();
        uow.complete().unwrap();

        let uow = fixture.uow();
        let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
        let partner = owner.partner();
        assert_eq!(
            partner.reference().unwrap(),
            Some(EntityReference::parse("partner"))
        );
        let resolved = partner.get(&uow).unwrap().unwrap();
        assert_eq!(resolved.name().unwrap(), "p", "{:?}", fixture.kind);
        // same session, same cached state
        let again: Thing = uow.get(&EntityReference::parse("partner")).unwrap();
        again.set_name("q").unwrap();
        assert_eq!(resolved.name().unwrap(), "q");
    });
}

#[test]
fn clearing_optional_association() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(None).unwrap();
    let partner: Thing = uow.new_entity(None).unwrap();
    owner.partner().set(Some(&partner)).unwrap();
    owner.partner().set(None).unwrap();
    assert_eq!(owner.partner().get(&uow).unwrap(), None);
    uow.complete().unwrap();
}

#[test]
fn dangling_reference_surfaces_on_access() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
    let partner: Thing = uow.new_entity(Some(Identity::new("partner"))).unwrap();
    owner.partner().set(Some(&partner)).unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let partner: Thing = uow.get(&EntityReference::parse("partner")).unwrap();
    uow.remove(&partner).unwrap();
    uow.complete().unwrap();

    let uow = fixture.uow();
    let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
    let err = owner.partner().get(&uow).unwrap_err();
    assert!(err.is_no_such_entity());
}

#[test]
fn removed_target_is_not_served_from_the_view() {
    for_each_store(|fixture| {
        let uow = fixture.uow();
        let owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
        let partner: Thing = uow.new_entity(Some(Identity::new("partner"))).unwrap();
        owner.partner().set(Some(&partner)).unwrap();
        uow.complete().unwrap();

        let uow = fixture.uow();
        let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
        let view = owner.partner();
        let resolved = view.get(&uow).unwrap().unwrap();
        uow.remove(&resolved).unwrap();

        let err = view.get(&uow).unwrap_err();
        assert!(err.is_no_such_entity(), "{:?}: {err}", fixture.kind);
        uow.discard();
    });
}

#[test]
fn association_rejects_foreign_session() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let first = fixture.uow();
    let second = fixture.uow();
    let owner: Thing = first.new_entity(None).unwrap();
    let stranger: Thing = second.new_entity(None).unwrap();

    let err = owner.partner().set(Some(&stranger)).unwrap_err();
    assert!(matches!(err, CoreError::UnitOfWork { .. }), "{err}");
    assert!(owner.partner().get(&second).is_err());
    assert!(owner.friends().push(&stranger).is_err());
    assert!(owner.labeled().put("x", &stranger).is_err());
}

#[test]
fn many_association_edits() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(None).unwrap();
    let a: Thing = uow.new_entity(None).unwrap();
    let b: Thing = uow.new_entity(None).unwrap();
    let friends = owner.friends();

    assert!(friends.push(&a).unwrap());
    assert!(friends.add(0, &b).unwrap());
    assert_eq!(friends.count().unwrap(), 2);
    assert!(friends.contains(&a).unwrap());
    assert_eq!(friends.get(&uow, 0).unwrap(), Some(b.clone()));
    assert_eq!(friends.get(&uow, 5).unwrap(), None);
    assert!(friends.add(9, &a).is_err());

    assert!(friends.remove(&b).unwrap());
    assert!(!friends.remove(&b).unwrap());
    friends.clear().unwrap();
    assert_eq!(friends.count().unwrap(), 0);
}

#[test]
fn named_association_edits() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(None).unwrap();
    let a: Thing = uow.new_entity(None).unwrap();
    let labeled = owner.labeled();

    assert!(!labeled.put("one", &a).unwrap());
    assert!(!labeled.put("two", &a).unwrap());
    assert_eq!(labeled.names().unwrap(), vec!["one", "two"]);
    assert!(labeled.contains_name("two").unwrap());
    assert_eq!(labeled.get(&uow, "one").unwrap(), Some(a.clone()));
    assert_eq!(labeled.get(&uow, "three").unwrap(), None);
    assert!(labeled.remove("one").unwrap());
    assert!(!labeled.remove("one").unwrap());
    assert_eq!(labeled.name_of(&a).unwrap().as_deref(), Some("two"));
}

#[test]
fn views_fail_after_session_closes() {
    let fixture = StoreFixture::new(StoreKind::Memory);
    let uow = fixture.uow();
    let owner: Thing = uow.new_entity(None).unwrap();
    let other: Thing = uow.new_entity(None).unwrap();
    uow.discard();

    assert!(owner.friends().push(&other).is_err());
    assert!(owner.name().is_err());
    assert_eq!(owner.reference(), owner.handle().reference().clone());
}
