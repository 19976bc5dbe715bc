//! In-memory entity store.

use super::{
    Change, EntityStates, EntityStore, EntityStoreUnitOfWork, StagedBatch, StateCommitter,
};
use crate::config::Config;
use crate::entity::{EntityRecord, EntityReference, EntityState};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Entity store keeping committed records in a map.
///
/// Versioned by default. With `track_versions(false)` it behaves like a store
/// without a version concept: every state reports the empty version and no
/// conflicts are detected.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    config: Config,
    records: RwLock<HashMap<EntityReference, EntityRecord>>,
}

impl InMemoryEntityStore {
    /// Creates an empty versioned store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn commit_batch(&self, batch: &StagedBatch) -> CoreResult<()> {
        let mut records = self.records.write();
        batch.validate(|reference| records.get(reference).map(|r| r.version.clone()))?;
        for change in &batch.changes {
            match change {
                Change::Put(record) => {
                    records.insert(record.reference.clone(), record.clone());
                }
                Change::Remove(reference) => {
                    records.remove(reference);
                }
            }
        }
        tracing::debug!(
            session = %batch.session,
            changes = batch.changes.len(),
            "committed batch to memory store"
        );
        Ok(())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn entity_states(&self) -> CoreResult<EntityStates<'_>> {
        let snapshot: Vec<EntityRecord> = self.records.read().values().cloned().collect();
        Ok(Box::new(
            snapshot.into_iter().map(|r| Ok(EntityState::from_record(r))),
        ))
    }

    fn entity_state_of(
        &self,
        _uow: &EntityStoreUnitOfWork,
        reference: &EntityReference,
    ) -> CoreResult<EntityState> {
        self.records
            .read()
            .get(reference)
            .cloned()
            .map(EntityState::from_record)
            .ok_or_else(|| CoreError::no_such_entity(reference))
    }

    fn version_of(&self, _uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<Version> {
        self.records
            .read()
            .get(reference)
            .map(|r| r.version.clone())
            .ok_or_else(|| CoreError::no_such_entity(reference))
    }

    fn apply_changes(
        &self,
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
    ) -> CoreResult<Box<dyn StateCommitter + '_>> {
        let batch = StagedBatch::stage(uow, states, &self.config)?;
        Ok(Box::new(MemoryCommitter { store: self, batch }))
    }
}

struct MemoryCommitter<'a> {
    store: &'a InMemoryEntityStore,
    batch: StagedBatch,
}

impl StateCommitter for MemoryCommitter<'_> {
    fn commit(self: Box<Self>) -> CoreResult<()> {
        self.store.commit_batch(&self.batch)
    }

    fn cancel(self: Box<Self>) {
        tracing::trace!(session = %self.batch.session, "cancelled staged batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDescriptor, QualifiedName, Value};
    use crate::types::Usecase;
    use chrono::Utc;

    fn session(store: &InMemoryEntityStore) -> EntityStoreUnitOfWork {
        store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap()
    }

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Item").property("name", "unnamed").build()
    }

    fn create(store: &InMemoryEntityStore, id: &str) -> Version {
        let uow = session(store);
        let state = store
            .new_entity_state(&uow, EntityReference::parse(id), &descriptor())
            .unwrap();
        store.apply_changes(&uow, vec![state]).unwrap().commit().unwrap();
        uow.commit_version(true)
    }

    #[test]
    fn new_state_gets_defaults() {
        let store = InMemoryEntityStore::new();
        let uow = session(&store);
        let state = store
            .new_entity_state(&uow, EntityReference::parse("a"), &descriptor())
            .unwrap();
        assert_eq!(
            state.property(&QualifiedName::new("Item", "name")),
            Some(&Value::from("unnamed"))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn staged_batch_is_invisible_until_commit() {
        let store = InMemoryEntityStore::new();
        let uow = session(&store);
        let state = store
            .new_entity_state(&uow, EntityReference::parse("a"), &descriptor())
            .unwrap();
        let committer = store.apply_changes(&uow, vec![state]).unwrap();
        assert!(store.is_empty());
        committer.cancel();
        assert!(store.is_empty());
    }

    #[test]
    fn commit_assigns_session_version() {
        let store = InMemoryEntityStore::new();
        let version = create(&store, "a");
        let uow = session(&store);
        assert_eq!(store.version_of(&uow, &EntityReference::parse("a")).unwrap(), version);
        let state = store.entity_state_of(&uow, &EntityReference::parse("a")).unwrap();
        assert_eq!(state.version(), &version);
    }

    #[test]
    fn missing_entity_is_reported() {
        let store = InMemoryEntityStore::new();
        let err = store
            .entity_state_of(&session(&store), &EntityReference::parse("nope"))
            .unwrap_err();
        assert!(err.is_no_such_entity());
    }

    #[test]
    fn stale_update_conflicts() {
        let store = InMemoryEntityStore::new();
        create(&store, "a");
        let reference = EntityReference::parse("a");
        let (first, second) = (session(&store), session(&store));
        let mut a = store.entity_state_of(&first, &reference).unwrap();
        let mut b = store.entity_state_of(&second, &reference).unwrap();
        a.touch().unwrap();
        b.touch().unwrap();
        store.apply_changes(&first, vec![a]).unwrap().commit().unwrap();
        let err = store.apply_changes(&second, vec![b]).unwrap().commit().unwrap_err();
        assert!(err.is_concurrent_modification());
    }

    #[test]
    fn untracked_store_never_conflicts() {
        let store = InMemoryEntityStore::with_config(Config::new().track_versions(false));
        create(&store, "a");
        let reference = EntityReference::parse("a");
        let (first, second) = (session(&store), session(&store));
        let mut a = store.entity_state_of(&first, &reference).unwrap();
        let mut b = store.entity_state_of(&second, &reference).unwrap();
        assert!(a.version().is_empty());
        a.touch().unwrap();
        b.touch().unwrap();
        store.apply_changes(&first, vec![a]).unwrap().commit().unwrap();
        store.apply_changes(&second, vec![b]).unwrap().commit().unwrap();
    }

    #[test]
    fn entity_states_are_fresh_copies() {
        let store = InMemoryEntityStore::new();
        create(&store, "a");
        create(&store, "b");
        let states: Vec<_> = store.entity_states().unwrap().collect::<CoreResult<_>>().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(store.entity_states().unwrap().count(), 2);
    }
}
