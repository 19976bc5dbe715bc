//! Many-associations behave like a `Vec` across commits.

use proptest::prelude::*;
use unitas_core::{Entity, EntityReference, Identity};
use unitas_testkit::{many_op_sequence_strategy, ManyOp, PropTestConfig, StoreFixture, StoreKind, Thing};

const POOL: usize = 4;

fn target(i: usize) -> EntityReference {
    EntityReference::parse(&format!("t{i}"))
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn matches_vec_model(ops in many_op_sequence_strategy(POOL, 24), split in 0usize..24) {
        let fixture = StoreFixture::new(StoreKind::Journal);
        let uow = fixture.uow();
        let _owner: Thing = uow.new_entity(Some(Identity::new("owner"))).unwrap();
        for i in 0..POOL {
            let _: Thing = uow.new_entity(Some(Identity::new(format!("t{i}")))).unwrap();
        }
        uow.complete().unwrap();

        let mut model: Vec<EntityReference> = Vec::new();
        // commit part way through to exercise reload
        for (chunk, ops) in [&ops[..split.min(ops.len())], &ops[split.min(ops.len())..]].into_iter().enumerate() {
            let uow = fixture.uow();
            let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
            let friends = owner.friends();
            prop_assert_eq!(friends.references().unwrap(), model.clone(), "chunk {}", chunk);
            for op in ops {
                match op {
                    ManyOp::Push(t) => {
                        let entity: Thing = uow.get(&target(*t)).unwrap();
                        friends.push(&entity).unwrap();
                        model.push(target(*t));
                    }
                    ManyOp::Insert { index, target: t } => {
                        let entity: Thing = uow.get(&target(*t)).unwrap();
                        let index = (*index).min(model.len());
                        friends.add(index, &entity).unwrap();
                        model.insert(index, target(*t));
                    }
                    ManyOp::Remove(t) => {
                        let entity: Thing = uow.get(&target(*t)).unwrap();
                        let removed = friends.remove(&entity).unwrap();
                        let position = model.iter().position(|r| *r == target(*t));
                        prop_assert_eq!(removed, position.is_some());
                        if let Some(position) = position {
                            model.remove(position);
                        }
                    }
                    ManyOp::Clear => {
                        friends.clear().unwrap();
                        model.clear();
                    }
                }
            }
            uow.complete().unwrap();
        }

        let uow = fixture.uow();
        let owner: Thing = uow.get(&EntityReference::parse("owner")).unwrap();
        prop_assert_eq!(owner.friends().references().unwrap(), model);
        prop_assert_eq!(owner.reference(), EntityReference::parse("owner"));
    }
}
