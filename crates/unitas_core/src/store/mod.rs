//! The entity store contract and the bundled stores.
//!
//! A store hands out [`EntityState`]s for a session and accepts batches of
//! changed states through [`EntityStore::apply_changes`]. Nothing becomes
//! visible to other sessions until the returned [`StateCommitter`] is
//! committed; the version check and the durable write happen together inside
//! one critical section of the store.

mod journal;
mod memory;
mod preferences;

pub use journal::{JournalEntityStore, JournalReport};
pub use memory::InMemoryEntityStore;
pub use preferences::{PreferenceNode, PreferencesEntityStore};

use crate::config::Config;
use crate::entity::{EntityDescriptor, EntityRecord, EntityReference, EntityState, EntityStatus, StateOrigin};
use crate::error::{CoreError, CoreResult};
use crate::types::{Usecase, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lazy sequence of freshly loaded entity states.
///
/// Dropping it releases whatever the store opened to produce it.
pub type EntityStates<'a> = Box<dyn Iterator<Item = CoreResult<EntityState>> + 'a>;

/// Two-phase handle for a staged batch of changes.
///
/// Exactly one of [`commit`](StateCommitter::commit) or
/// [`cancel`](StateCommitter::cancel) is called, exactly once. Both consume
/// the committer.
pub trait StateCommitter {
    /// Makes the staged batch durable and visible.
    ///
    /// All-or-nothing: on error the store is left as if `cancel` had run.
    fn commit(self: Box<Self>) -> CoreResult<()>;

    /// Discards the staged batch.
    fn cancel(self: Box<Self>);
}

/// Store-facing session, bound to one caller-facing unit of work.
#[derive(Debug, Clone)]
pub struct EntityStoreUnitOfWork {
    identity: String,
    usecase: Usecase,
    current_time: DateTime<Utc>,
}

impl EntityStoreUnitOfWork {
    /// Opens a session context with a fresh identity.
    #[must_use]
    pub fn new(usecase: Usecase, current_time: DateTime<Utc>) -> Self {
        Self {
            identity: Uuid::new_v4().to_string(),
            usecase,
            current_time,
        }
    }

    /// Returns the unique session identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the session usecase.
    #[must_use]
    pub const fn usecase(&self) -> &Usecase {
        &self.usecase
    }

    /// Returns the time the session was opened with.
    #[must_use]
    pub const fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    /// Returns the version a versioning store assigns to states this session
    /// commits.
    #[must_use]
    pub fn commit_version(&self, track_versions: bool) -> Version {
        if track_versions {
            Version::new(self.identity.clone())
        } else {
            Version::empty()
        }
    }
}

/// Physical storage behind units of work.
pub trait EntityStore: Send + Sync {
    /// Opens a store session. Must not block.
    fn new_unit_of_work(
        &self,
        usecase: Usecase,
        current_time: DateTime<Utc>,
    ) -> CoreResult<EntityStoreUnitOfWork> {
        Ok(EntityStoreUnitOfWork::new(usecase, current_time))
    }

    /// Enumerates every stored entity, each freshly loaded.
    ///
    /// Each call starts a new enumeration.
    fn entity_states(&self) -> CoreResult<EntityStates<'_>>;

    /// Allocates a `NEW` state with the descriptor's default property values.
    ///
    /// Does not touch physical storage.
    fn new_entity_state(
        &self,
        uow: &EntityStoreUnitOfWork,
        reference: EntityReference,
        descriptor: &EntityDescriptor,
    ) -> CoreResult<EntityState> {
        let mut state = EntityState::new(reference, descriptor.type_name(), uow.current_time());
        for property in descriptor.properties() {
            state.set_property(property.name().clone(), property.default_value().clone())?;
        }
        Ok(state)
    }

    /// Loads one entity as a `LOADED` state.
    ///
    /// Fails with [`CoreError::NoSuchEntity`] if it is not stored.
    fn entity_state_of(
        &self,
        uow: &EntityStoreUnitOfWork,
        reference: &EntityReference,
    ) -> CoreResult<EntityState>;

    /// Returns the currently stored version of an entity.
    fn version_of(&self, uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<Version>;

    /// Stages a batch of `NEW`, `UPDATED` and `REMOVED` states.
    ///
    /// The batch is invisible to other sessions until the committer commits.
    fn apply_changes(
        &self,
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
    ) -> CoreResult<Box<dyn StateCommitter + '_>>;
}

/// One change in a staged batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Insert or replace a record.
    Put(EntityRecord),
    /// Delete a record.
    Remove(EntityReference),
}

impl Change {
    /// Returns the reference this change touches.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        match self {
            Self::Put(record) => &record.reference,
            Self::Remove(reference) => reference,
        }
    }
}

/// What a staged state expects to find in the store at commit.
#[derive(Debug, Clone)]
enum Expectation {
    Absent,
    Version(Version),
}

/// A batch as the bundled stores stage it: the changes to write, plus what
/// each touched entity must look like for the commit to go through.
#[derive(Debug, Clone)]
pub(crate) struct StagedBatch {
    pub(crate) session: String,
    pub(crate) version: Version,
    pub(crate) changes: Vec<Change>,
    expectations: Vec<(EntityReference, Expectation)>,
}

impl StagedBatch {
    /// Stages `states`, stamping writes with the session's commit version.
    ///
    /// `LOADED` states and builder prototypes are ignored.
    pub(crate) fn stage(
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
        config: &Config,
    ) -> CoreResult<Self> {
        let states: Vec<_> = states
            .into_iter()
            .filter(|s| s.status().is_changed() && s.origin() != StateOrigin::Builder)
            .collect();
        if !config.accepts_batch(states.len()) {
            return Err(CoreError::entity_store(format!(
                "batch of {} states exceeds the limit of {}",
                states.len(),
                config.max_batch_size
            )));
        }

        let version = uow.commit_version(config.track_versions);
        let mut changes = Vec::with_capacity(states.len());
        let mut expectations = Vec::with_capacity(states.len());
        for state in states {
            let reference = state.reference().clone();
            match state.status() {
                EntityStatus::New => {
                    expectations.push((reference, Expectation::Absent));
                    changes.push(Change::Put(
                        state.to_record(version.clone(), uow.current_time()),
                    ));
                }
                EntityStatus::Updated => {
                    expectations.push((reference, Expectation::Version(state.version().clone())));
                    changes.push(Change::Put(
                        state.to_record(version.clone(), uow.current_time()),
                    ));
                }
                EntityStatus::Removed => {
                    expectations.push((
                        reference.clone(),
                        Expectation::Version(state.version().clone()),
                    ));
                    changes.push(Change::Remove(reference));
                }
                EntityStatus::Loaded => {}
            }
        }

        Ok(Self {
            session: uow.identity().to_string(),
            version,
            changes,
            expectations,
        })
    }

    /// Checks every expectation against the store's current versions.
    ///
    /// `stored` returns the stored version of a reference, or `None` if absent.
    /// States carrying the empty version skip the comparison.
    pub(crate) fn validate<F>(&self, mut stored: F) -> CoreResult<()>
    where
        F: FnMut(&EntityReference) -> Option<Version>,
    {
        let mut conflicts = Vec::new();
        for (reference, expectation) in &self.expectations {
            match (expectation, stored(reference)) {
                (Expectation::Absent, Some(_)) => {
                    return Err(CoreError::EntityAlreadyExists {
                        reference: reference.clone(),
                    });
                }
                (Expectation::Absent, None) => {}
                (Expectation::Version(expected), current) => {
                    if expected.is_empty() {
                        continue;
                    }
                    if current.as_ref() != Some(expected) {
                        conflicts.push(reference.clone());
                    }
                }
            }
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            tracing::debug!(session = %self.session, conflicts = conflicts.len(), "version check failed");
            Err(CoreError::ConcurrentEntityModification {
                references: conflicts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{QualifiedName, Value};

    fn uow() -> EntityStoreUnitOfWork {
        EntityStoreUnitOfWork::new(Usecase::default(), Utc::now())
    }

    fn loaded(id: &str, version: &str) -> EntityState {
        let state = EntityState::new(EntityReference::parse(id), "T", Utc::now());
        EntityState::from_record(state.to_record(Version::new(version), Utc::now()))
    }

    #[test]
    fn sessions_have_distinct_identities() {
        assert_ne!(uow().identity(), uow().identity());
        let session = uow();
        assert_eq!(session.commit_version(true).as_str(), session.identity());
        assert!(session.commit_version(false).is_empty());
    }

    #[test]
    fn staging_skips_unchanged_states() {
        let mut updated = loaded("b", "v1");
        updated
            .set_property(QualifiedName::new("T", "x"), Value::Integer(1))
            .unwrap();
        let batch = StagedBatch::stage(&uow(), vec![loaded("a", "v1"), updated], &Config::default())
            .unwrap();
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].reference(), &EntityReference::parse("b"));
    }

    #[test]
    fn validation_reports_every_conflict() {
        let mut a = loaded("a", "v1");
        let mut b = loaded("b", "v1");
        a.remove().unwrap();
        b.touch().unwrap();
        let batch = StagedBatch::stage(&uow(), vec![a, b], &Config::default()).unwrap();
        let err = batch.validate(|_| Some(Version::new("v2"))).unwrap_err();
        match err {
            CoreError::ConcurrentEntityModification { references } => assert_eq!(references.len(), 2),
            other => panic!("unexpected {other}"),
        }
        assert!(batch.validate(|_| Some(Version::new("v1"))).is_ok());
    }

    #[test]
    fn untracked_versions_skip_the_check() {
        let mut a = loaded("a", "");
        a.touch().unwrap();
        let batch = StagedBatch::stage(&uow(), vec![a], &Config::default()).unwrap();
        assert!(batch.validate(|_| Some(Version::new("anything"))).is_ok());
        assert!(batch.validate(|_| None).is_ok());
    }

    #[test]
    fn new_state_must_be_absent() {
        let state = EntityState::new(EntityReference::parse("n"), "T", Utc::now());
        let batch = StagedBatch::stage(&uow(), vec![state], &Config::default()).unwrap();
        let err = batch.validate(|_| Some(Version::empty())).unwrap_err();
        assert!(matches!(err, CoreError::EntityAlreadyExists { .. }));
    }

    #[test]
    fn batch_limit_is_enforced() {
        let states = (0..3)
            .map(|i| EntityState::new(EntityReference::parse(&i.to_string()), "T", Utc::now()))
            .collect();
        let config = Config::new().max_batch_size(2);
        assert!(StagedBatch::stage(&uow(), states, &config).is_err());
    }
}
