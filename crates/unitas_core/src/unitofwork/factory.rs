//! Opening sessions.

use super::session::UnitOfWork;
use crate::entity::EntityRegistry;
use crate::error::CoreResult;
use crate::store::EntityStore;
use crate::types::Usecase;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Opens units of work against one store with one set of entity types.
///
/// Cheap to clone and `Send + Sync`, so it can be shared across threads that
/// each open their own sessions.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    store: Arc<dyn EntityStore>,
    registry: Arc<EntityRegistry>,
}

impl std::fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl UnitOfWorkFactory {
    /// Creates a factory.
    pub fn new(store: Arc<dyn EntityStore>, registry: EntityRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// Returns the store sessions are opened against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Returns the registry of entity types.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Opens a session with the default usecase at the current time.
    pub fn new_unit_of_work(&self) -> CoreResult<UnitOfWork> {
        self.new_unit_of_work_at(Usecase::default(), Utc::now())
    }

    /// Opens a session for `usecase` at the current time.
    pub fn new_unit_of_work_for(&self, usecase: Usecase) -> CoreResult<UnitOfWork> {
        self.new_unit_of_work_at(usecase, Utc::now())
    }

    /// Opens a session for `usecase` with an explicit current time.
    pub fn new_unit_of_work_at(&self, usecase: Usecase, current_time: DateTime<Utc>) -> CoreResult<UnitOfWork> {
        UnitOfWork::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            usecase,
            current_time,
        )
    }
}
