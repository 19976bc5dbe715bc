use super::builder::EntityBuilder;
use super::callback::{UnitOfWorkCallback, UnitOfWorkStatus};
use super::handle::{Entity, EntityHandle};
use super::{SessionGuard, SessionPhase, StateRef};
use crate::entity::{
    EntityDescriptor, EntityReference, EntityRegistry, EntityState, EntityStatus, Identity,
    StateOrigin,
};
use crate::error::{CoreError, CoreResult};
use crate::store::{EntityStore, EntityStoreUnitOfWork, StateCommitter};
use crate::types::{Usecase, Version};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A bounded, single-threaded session for reading and writing entities.
///
/// All writes are buffered in the session cache until [`complete`] hands the
/// changed states to the store. [`discard`] drops them. Dropping an open
/// session discards it.
///
/// [`complete`]: UnitOfWork::complete
/// [`discard`]: UnitOfWork::discard
pub struct UnitOfWork {
    store: Arc<dyn EntityStore>,
    registry: Arc<EntityRegistry>,
    store_uow: EntityStoreUnitOfWork,
    cache: RefCell<BTreeMap<EntityReference, StateRef>>,
    session: SessionGuard,
    callbacks: RefCell<Vec<Rc<dyn UnitOfWorkCallback>>>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("identity", &self.store_uow.identity())
            .field("usecase", self.store_uow.usecase())
            .field("phase", &self.session.phase())
            .field("cached", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Cancels a staged batch unless it was committed.
struct PendingCommit<'a>(Option<Box<dyn StateCommitter + 'a>>);

impl PendingCommit<'_> {
    fn commit(mut self) -> CoreResult<()> {
        match self.0.take() {
            Some(committer) => committer.commit(),
            None => Ok(()),
        }
    }
}

impl Drop for PendingCommit<'_> {
    fn drop(&mut self) {
        if let Some(committer) = self.0.take() {
            committer.cancel();
        }
    }
}

impl UnitOfWork {
    /// Opens a session against `store`.
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<EntityRegistry>,
        usecase: Usecase,
        current_time: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let store_uow = store.new_unit_of_work(usecase, current_time)?;
        tracing::debug!(
            session = %store_uow.identity(),
            usecase = %store_uow.usecase(),
            "opened unit of work"
        );
        Ok(Self {
            store,
            registry,
            store_uow,
            cache: RefCell::new(BTreeMap::new()),
            session: SessionGuard::new(),
            callbacks: RefCell::new(Vec::new()),
        })
    }

    /// Returns the unique session identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.store_uow.identity()
    }

    /// Returns the session usecase.
    #[must_use]
    pub fn usecase(&self) -> &Usecase {
        self.store_uow.usecase()
    }

    /// Returns the time the session was opened with.
    #[must_use]
    pub fn current_time(&self) -> DateTime<Utc> {
        self.store_uow.current_time()
    }

    /// Returns the registry of visible entity types.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Returns true until the session is completed or discarded.
    ///
    /// A paused session, or one whose completion failed, is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            self.session.phase(),
            SessionPhase::Open | SessionPhase::Paused | SessionPhase::Failed
        )
    }

    /// Returns true if the session accepts reads and writes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.phase() == SessionPhase::Open
    }

    /// Returns true while the session is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.session.phase() == SessionPhase::Paused
    }

    /// Suspends the session; every operation fails until [`resume`].
    ///
    /// [`resume`]: UnitOfWork::resume
    pub fn pause(&self) -> CoreResult<()> {
        self.session.check_active()?;
        self.session.set(SessionPhase::Paused);
        tracing::trace!(session = %self.identity(), "paused unit of work");
        Ok(())
    }

    /// Resumes a paused session.
    pub fn resume(&self) -> CoreResult<()> {
        if self.session.phase() != SessionPhase::Paused {
            return Err(CoreError::unit_of_work("unit of work is not paused"));
        }
        self.session.set(SessionPhase::Open);
        tracing::trace!(session = %self.identity(), "resumed unit of work");
        Ok(())
    }

    /// Registers a completion callback.
    pub fn add_callback(&self, callback: Rc<dyn UnitOfWorkCallback>) {
        self.callbacks.borrow_mut().push(callback);
    }

    /// Removes a previously registered callback.
    pub fn remove_callback(&self, callback: &Rc<dyn UnitOfWorkCallback>) {
        self.callbacks
            .borrow_mut()
            .retain(|registered| !Rc::ptr_eq(registered, callback));
    }

    pub(crate) fn session(&self) -> &SessionGuard {
        &self.session
    }

    // ---- creation ----

    /// Allocates a `NEW` state of `type_name`, generating an identity when
    /// none is given.
    ///
    /// Fails with [`CoreError::IdentityAlreadyExists`] if the reference is
    /// already live in this session.
    pub fn new_entity_state(
        &self,
        reference: Option<EntityReference>,
        type_name: &str,
    ) -> CoreResult<EntityHandle> {
        self.session.check_active()?;
        let descriptor = self.registry.get(type_name)?;
        let reference = reference.unwrap_or_else(EntityReference::generate);
        self.ensure_identity_free(&reference)?;
        let state = self
            .store
            .new_entity_state(&self.store_uow, reference, &descriptor)?;
        Ok(self.cache_new(state, descriptor))
    }

    /// Starts building an entity of type `T`.
    pub fn new_entity_builder<T: Entity>(&self, identity: Option<Identity>) -> CoreResult<EntityBuilder<'_, T>> {
        self.session.check_active()?;
        let descriptor = self.registry.get(T::TYPE_NAME)?;
        let reference = identity.map_or_else(EntityReference::generate, EntityReference::new);
        EntityBuilder::new(self, reference, descriptor)
    }

    /// Creates an entity of type `T` with default values.
    pub fn new_entity<T: Entity>(&self, identity: Option<Identity>) -> CoreResult<T> {
        self.new_entity_builder::<T>(identity)?.new_instance()
    }

    /// Only a state created and then removed in this session may be
    /// replaced; a removal of a loaded entity is still pending against the
    /// store.
    pub(crate) fn ensure_identity_free(&self, reference: &EntityReference) -> CoreResult<()> {
        let taken = self.cache.borrow().get(reference).is_some_and(|state| {
            let state = state.borrow();
            !state.is_removed() || state.origin() != StateOrigin::Created
        });
        if taken {
            return Err(CoreError::IdentityAlreadyExists {
                reference: reference.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn store_new_state(
        &self,
        reference: EntityReference,
        descriptor: &EntityDescriptor,
    ) -> CoreResult<EntityState> {
        self.store
            .new_entity_state(&self.store_uow, reference, descriptor)
    }

    pub(crate) fn cache_new(&self, state: EntityState, descriptor: Arc<EntityDescriptor>) -> EntityHandle {
        let reference = state.reference().clone();
        let state = Rc::new(RefCell::new(state));
        self.cache.borrow_mut().insert(reference, Rc::clone(&state));
        EntityHandle::new(state, descriptor, self.session.clone())
    }

    // ---- lookup ----

    /// Returns the entity of type `T` with the given reference.
    ///
    /// Served from the session cache when possible, otherwise loaded from the
    /// store. Fails with [`CoreError::NoSuchEntity`] if it does not exist, was
    /// removed in this session, or is stored with a different type, and with
    /// [`CoreError::NoSuchEntityType`] if `T` is not registered.
    pub fn get<T: Entity>(&self, reference: &EntityReference) -> CoreResult<T> {
        self.session.check_active()?;
        self.registry.get(T::TYPE_NAME)?;
        let handle = self.entity_state(reference)?;
        if handle.entity_type() != T::TYPE_NAME {
            return Err(CoreError::no_such_entity(reference));
        }
        Ok(T::from_handle(handle))
    }

    /// Returns an untyped view of the entity with the given reference.
    pub fn entity_state(&self, reference: &EntityReference) -> CoreResult<EntityHandle> {
        self.session.check_active()?;
        let state = self.state_ref(reference)?;
        let type_name = state.borrow().entity_type().to_string();
        let descriptor = self.registry.get(&type_name)?;
        Ok(EntityHandle::new(state, descriptor, self.session.clone()))
    }

    /// Returns the version currently stored for `reference`.
    pub fn version_of(&self, reference: &EntityReference) -> CoreResult<Version> {
        self.session.check_active()?;
        self.store.version_of(&self.store_uow, reference)
    }

    /// Returns the cached state, loading it on first access.
    fn state_ref(&self, reference: &EntityReference) -> CoreResult<StateRef> {
        if let Some(state) = self.cache.borrow().get(reference) {
            if state.borrow().is_removed() {
                return Err(CoreError::no_such_entity(reference));
            }
            return Ok(Rc::clone(state));
        }
        let state = self.store.entity_state_of(&self.store_uow, reference)?;
        if !self.registry.contains(state.entity_type()) {
            return Err(CoreError::no_such_entity_type(state.entity_type()));
        }
        tracing::trace!(session = %self.identity(), %reference, "loaded entity");
        let state = Rc::new(RefCell::new(state));
        self.cache
            .borrow_mut()
            .insert(reference.clone(), Rc::clone(&state));
        Ok(state)
    }

    // ---- removal ----

    /// Removes an entity together with every aggregated entity reachable from
    /// it.
    pub fn remove<T: Entity>(&self, entity: &T) -> CoreResult<()> {
        self.remove_reference(entity.handle().reference())
    }

    /// Removes the entity with the given reference, cascading through
    /// aggregated associations of every kind.
    ///
    /// All aggregated entities are loaded before anything is marked, so a
    /// failing load leaves the session untouched. Aggregated references that
    /// no longer resolve are skipped.
    pub fn remove_reference(&self, reference: &EntityReference) -> CoreResult<()> {
        self.session.check_active()?;
        let root = self.state_ref(reference)?;

        let mut visited = HashSet::from([reference.clone()]);
        let mut queue = VecDeque::from([Rc::clone(&root)]);
        let mut children = Vec::new();
        while let Some(state) = queue.pop_front() {
            let targets = {
                let state = state.borrow();
                let descriptor = self.registry.get(state.entity_type())?;
                let targets: Vec<_> = descriptor
                    .aggregated_associations()
                    .flat_map(|association| EntityHandle::targets_of(&state, association))
                    .collect();
                targets
            };
            for target in targets {
                if !visited.insert(target.clone()) {
                    continue;
                }
                match self.state_ref(&target) {
                    Ok(child) => {
                        children.push(Rc::clone(&child));
                        queue.push_back(child);
                    }
                    Err(err) if err.is_no_such_entity() => {
                        tracing::warn!(parent = %reference, child = %target, "aggregated entity is missing");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        for child in children.iter().rev() {
            child.borrow_mut().remove()?;
        }
        root.borrow_mut().remove()?;
        tracing::debug!(
            session = %self.identity(),
            %reference,
            cascaded = children.len(),
            "removed entity"
        );
        Ok(())
    }

    // ---- completion ----

    /// Hands every changed state to the store and commits the batch.
    ///
    /// A session without changes completes without calling the store. On
    /// failure the store is left untouched and the session must be
    /// discarded. Conflicts surface as
    /// [`CoreError::ConcurrentEntityModification`]; other failures as
    /// [`CoreError::UnitOfWorkCompletion`].
    pub fn complete(&self) -> CoreResult<()> {
        self.session.check_active()?;

        let callbacks = self.callbacks.borrow().clone();
        for callback in &callbacks {
            callback.before_completion(self).map_err(CoreError::completion)?;
        }

        let (mut created, mut updated, mut removed) = (0usize, 0usize, 0usize);
        let changed: Vec<EntityState> = self
            .cache
            .borrow()
            .values()
            .filter_map(|state| {
                let state = state.borrow();
                match (state.status(), state.origin()) {
                    (EntityStatus::Loaded, _) => None,
                    // created and removed in this session: never stored
                    (EntityStatus::Removed, StateOrigin::Created) => None,
                    (status, _) => {
                        match status {
                            EntityStatus::New => created += 1,
                            EntityStatus::Updated => updated += 1,
                            _ => removed += 1,
                        }
                        Some(state.clone())
                    }
                }
            })
            .collect();

        if !changed.is_empty() {
            if let Err(err) = self.apply(changed) {
                self.session.set(SessionPhase::Failed);
                tracing::debug!(session = %self.identity(), error = %err, "completion failed");
                return Err(CoreError::completion(err));
            }
        }

        tracing::debug!(
            session = %self.identity(),
            created,
            updated,
            removed,
            "completed unit of work"
        );
        self.close(SessionPhase::Completed, UnitOfWorkStatus::Completed, &callbacks);
        Ok(())
    }

    fn apply(&self, changed: Vec<EntityState>) -> CoreResult<()> {
        let committer = self.store.apply_changes(&self.store_uow, changed)?;
        PendingCommit(Some(committer)).commit()
    }

    /// Drops every buffered change without touching the store.
    ///
    /// Idempotent, and a no-op after completion.
    pub fn discard(&self) {
        match self.session.phase() {
            SessionPhase::Completed | SessionPhase::Discarded => {}
            SessionPhase::Open | SessionPhase::Paused | SessionPhase::Failed => {
                let callbacks = self.callbacks.borrow().clone();
                tracing::debug!(session = %self.identity(), "discarded unit of work");
                self.close(SessionPhase::Discarded, UnitOfWorkStatus::Discarded, &callbacks);
            }
        }
    }

    fn close(&self, phase: SessionPhase, status: UnitOfWorkStatus, callbacks: &[Rc<dyn UnitOfWorkCallback>]) {
        self.session.set(phase);
        self.cache.borrow_mut().clear();
        for callback in callbacks {
            callback.after_completion(status);
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.is_open() {
            self.discard();
        }
    }
}
