//! Store fixtures with automatic cleanup.
//!
//! Every fixture wraps its store in a [`RecordingStore`] so suites can assert
//! how often the write path was entered.

use crate::model::registry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use unitas_core::{
    Config, CoreResult, EntityReference, EntityState, EntityStates, EntityStore,
    EntityStoreUnitOfWork, InMemoryEntityStore, JournalEntityStore, PreferencesEntityStore,
    StateCommitter, UnitOfWork, UnitOfWorkFactory, Version,
};

/// The bundled store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// [`InMemoryEntityStore`] with version tracking.
    Memory,
    /// [`InMemoryEntityStore`] without version tracking.
    MemoryUntracked,
    /// [`JournalEntityStore`] over an in-memory device.
    Journal,
    /// [`JournalEntityStore`] over a file in a temp directory.
    JournalFile,
    /// [`PreferencesEntityStore`] persisted to a temp file.
    Preferences,
}

impl StoreKind {
    /// Every kind, for running a suite against all stores.
    pub const ALL: [StoreKind; 5] = [
        Self::Memory,
        Self::MemoryUntracked,
        Self::Journal,
        Self::JournalFile,
        Self::Preferences,
    ];

    /// Returns true if the store assigns version tokens.
    #[must_use]
    pub const fn tracks_versions(self) -> bool {
        matches!(self, Self::Memory | Self::Journal | Self::JournalFile)
    }

    /// Returns true if reopening the fixture keeps the data.
    #[must_use]
    pub const fn is_durable(self) -> bool {
        matches!(self, Self::JournalFile | Self::Preferences)
    }
}

/// Counts calls into the write path of the wrapped store.
pub struct RecordingStore {
    inner: Box<dyn EntityStore>,
    applied: AtomicUsize,
    committed_states: AtomicUsize,
}

impl RecordingStore {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn EntityStore>) -> Self {
        Self {
            inner,
            applied: AtomicUsize::new(0),
            committed_states: AtomicUsize::new(0),
        }
    }

    /// Number of `apply_changes` calls.
    pub fn apply_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Total number of states handed to `apply_changes`.
    pub fn state_count(&self) -> usize {
        self.committed_states.load(Ordering::SeqCst)
    }
}

impl EntityStore for RecordingStore {
    fn entity_states(&self) -> CoreResult<EntityStates<'_>> {
        self.inner.entity_states()
    }

    fn entity_state_of(&self, uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<EntityState> {
        self.inner.entity_state_of(uow, reference)
    }

    fn version_of(&self, uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<Version> {
        self.inner.version_of(uow, reference)
    }

    fn apply_changes(
        &self,
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
    ) -> CoreResult<Box<dyn StateCommitter + '_>> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.committed_states.fetch_add(states.len(), Ordering::SeqCst);
        self.inner.apply_changes(uow, states)
    }
}

/// A store plus a factory over the test model, with automatic cleanup.
pub struct StoreFixture {
    /// Which store this is.
    pub kind: StoreKind,
    /// The wrapped store.
    pub store: Arc<RecordingStore>,
    /// Factory over [`registry`].
    pub factory: UnitOfWorkFactory,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl StoreFixture {
    /// Creates a fresh, empty fixture of the given kind.
    pub fn new(kind: StoreKind) -> Self {
        let temp_dir = kind
            .is_durable()
            .then(|| TempDir::new().expect("Failed to create temp directory"));
        Self::open(kind, temp_dir)
    }

    fn data_path(kind: StoreKind, dir: &TempDir) -> PathBuf {
        match kind {
            StoreKind::Preferences => dir.path().join("entities.json"),
            _ => dir.path().join("entities.journal"),
        }
    }

    fn open(kind: StoreKind, temp_dir: Option<TempDir>) -> Self {
        let inner: Box<dyn EntityStore> = match (kind, &temp_dir) {
            (StoreKind::Memory, _) => Box::new(InMemoryEntityStore::new()),
            (StoreKind::MemoryUntracked, _) => Box::new(InMemoryEntityStore::with_config(
                Config::new().track_versions(false),
            )),
            (StoreKind::Journal, _) => Box::new(JournalEntityStore::in_memory()),
            (StoreKind::JournalFile, Some(dir)) => Box::new(
                JournalEntityStore::open_path(&Self::data_path(kind, dir), Config::default())
                    .expect("Failed to open journal store"),
            ),
            (StoreKind::Preferences, Some(dir)) => Box::new(
                PreferencesEntityStore::open(Self::data_path(kind, dir))
                    .expect("Failed to open preferences store"),
            ),
            (_, None) => panic!("{kind:?} needs a temp directory"),
        };
        let store = Arc::new(RecordingStore::new(inner));
        let factory = UnitOfWorkFactory::new(store.clone(), registry());
        Self {
            kind,
            store,
            factory,
            temp_dir,
        }
    }

    /// Closes the store and opens it again over the same data.
    ///
    /// Panics for kinds that are not durable.
    pub fn reopen(self) -> Self {
        assert!(self.kind.is_durable(), "{:?} cannot be reopened", self.kind);
        let Self {
            kind,
            store,
            factory,
            temp_dir,
        } = self;
        drop(factory);
        drop(store);
        Self::open(kind, temp_dir)
    }

    /// Opens a session.
    pub fn uow(&self) -> UnitOfWork {
        self.factory
            .new_unit_of_work()
            .expect("Failed to open unit of work")
    }
}

/// Runs `f` with a fresh fixture of each kind.
pub fn for_each_store(mut f: impl FnMut(StoreFixture)) {
    for kind in StoreKind::ALL {
        f(StoreFixture::new(kind));
    }
}
