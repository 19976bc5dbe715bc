//! Storage failures during completion leave the journal untouched.

use std::sync::Arc;
use unitas_core::{Config, CoreError, EntityReference, EntityStore, Identity, JournalEntityStore, UnitOfWorkFactory};
use unitas_storage::{FaultInjectingBackend, FaultPlan, InMemoryBackend};
use unitas_testkit::{registry, Thing};

fn faulty_factory() -> (UnitOfWorkFactory, FaultPlan, InMemoryBackend) {
    let device = InMemoryBackend::new();
    let plan = FaultPlan::new();
    let store = JournalEntityStore::open(
        FaultInjectingBackend::new(device.clone(), plan.clone()),
        Config::default(),
    )
    .unwrap();
    (UnitOfWorkFactory::new(Arc::new(store), registry()), plan, device)
}

#[test]
fn failed_append_is_reported_and_rolled_back() {
    let (factory, plan, device) = faulty_factory();
    let uow = factory.new_unit_of_work().unwrap();
    let _: Thing = uow.new_entity(Some(Identity::new("kept"))).unwrap();
    uow.complete().unwrap();
    let committed = device.snapshot();

    plan.fail_appends_after(1);
    let uow = factory.new_unit_of_work().unwrap();
    let _: Thing = uow.new_entity(Some(Identity::new("lost"))).unwrap();
    let err = uow.complete().unwrap_err();
    assert!(matches!(err, CoreError::UnitOfWorkCompletion { .. }), "{err}");
    assert!(err.is_entity_store_failure());
    assert!(uow.is_open());
    assert!(uow.new_entity::<Thing>(None).is_err());
    uow.discard();
    assert!(!uow.is_open());
    assert_eq!(device.snapshot(), committed);

    plan.heal();
    let uow = factory.new_unit_of_work().unwrap();
    assert!(uow
        .get::<Thing>(&EntityReference::parse("lost"))
        .unwrap_err()
        .is_no_such_entity());
    let _: Thing = uow.new_entity(Some(Identity::new("lost"))).unwrap();
    uow.complete().unwrap();
    assert_eq!(factory.store().entity_states().unwrap().count(), 2);
}

#[test]
fn failed_flush_keeps_previous_state() {
    let (factory, plan, device) = faulty_factory();
    plan.fail_flushes();
    let uow = factory.new_unit_of_work().unwrap();
    let _: Thing = uow.new_entity(None).unwrap();
    assert!(uow.complete().unwrap_err().is_entity_store_failure());
    assert!(device.snapshot().is_empty());

    let verified = JournalEntityStore::verify(&device).unwrap();
    assert_eq!(verified.entities, 0);
    assert!(verified.is_clean());
}
