//! Append-only journal entity store.
//!
//! Every committed batch is written as one `Begin` frame, a `Put` or `Remove`
//! frame per entity, and a `Commit` frame. The store keeps an index from
//! reference to the offset of the latest `Put` and reads records lazily.
//!
//! ## Recovery
//!
//! Opening replays only batches sealed by a `Commit` frame. A torn tail (a
//! partially written frame or a batch without its `Commit`) is truncated away
//! with a warning. Checksum failures and malformed headers are fatal.
//!
//! ## Invariants
//!
//! - The journal is append-only outside of recovery and failed commits
//! - A failed commit truncates the device back to its pre-batch size
//! - The version check and the write happen under one lock

mod frame;

use self::frame::{read_frame, BeginPayload, CommitPayload, Frame, RemovePayload};
use super::{Change, EntityStates, EntityStore, EntityStoreUnitOfWork, StagedBatch, StateCommitter};
use crate::config::Config;
use crate::entity::{EntityReference, EntityState};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use unitas_storage::{FileBackend, InMemoryBackend, StorageBackend};

pub use self::frame::{FRAME_MAGIC, FRAME_VERSION};

/// Where the latest record of an entity lives.
#[derive(Debug, Clone)]
struct Slot {
    offset: u64,
    version: Version,
}

/// Summary of a journal scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JournalReport {
    /// Committed batches.
    pub batches: u64,
    /// Live entities after replay.
    pub entities: usize,
    /// Total device size in bytes.
    pub size: u64,
    /// Bytes covered by committed batches.
    pub committed_size: u64,
    /// Batches started but never committed.
    pub incomplete_batches: u64,
}

impl JournalReport {
    /// Bytes past the last committed batch.
    #[must_use]
    pub const fn torn_bytes(&self) -> u64 {
        self.size - self.committed_size
    }

    /// Returns true if the journal ends exactly on a committed batch.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.torn_bytes() == 0 && self.incomplete_batches == 0
    }
}

enum PendingOp {
    Put {
        reference: EntityReference,
        slot: Slot,
    },
    Remove(EntityReference),
}

struct Replay {
    index: HashMap<EntityReference, Slot>,
    report: JournalReport,
}

fn replay(device: &dyn StorageBackend) -> CoreResult<Replay> {
    let end = device.size()?;
    let mut index = HashMap::new();
    let mut report = JournalReport {
        size: end,
        ..JournalReport::default()
    };
    let mut pending: Option<(BeginPayload, Vec<PendingOp>)> = None;
    let mut offset = 0;

    while let Some((frame, len)) = read_frame(device, offset, end)? {
        match frame {
            Frame::Begin(begin) => {
                if let Some((abandoned, _)) = pending.replace((begin, Vec::new())) {
                    tracing::warn!(session = %abandoned.session, offset, "dropping batch without commit");
                    report.incomplete_batches += 1;
                }
            }
            Frame::Put(record) => {
                let (_, ops) = pending
                    .as_mut()
                    .ok_or_else(|| CoreError::corruption(offset, "put outside a batch"))?;
                ops.push(PendingOp::Put {
                    reference: record.reference,
                    slot: Slot {
                        offset,
                        version: record.version,
                    },
                });
            }
            Frame::Remove(RemovePayload { reference }) => {
                let (_, ops) = pending
                    .as_mut()
                    .ok_or_else(|| CoreError::corruption(offset, "remove outside a batch"))?;
                ops.push(PendingOp::Remove(reference));
            }
            Frame::Commit(commit) => {
                let (begin, ops) = pending
                    .take()
                    .ok_or_else(|| CoreError::corruption(offset, "commit outside a batch"))?;
                if begin.session != commit.session || begin.changes as usize != ops.len() {
                    return Err(CoreError::corruption(offset, "commit does not match its batch"));
                }
                for op in ops {
                    match op {
                        PendingOp::Put { reference, slot } => {
                            index.insert(reference, slot);
                        }
                        PendingOp::Remove(reference) => {
                            index.remove(&reference);
                        }
                    }
                }
                report.batches += 1;
                report.committed_size = offset + len;
            }
        }
        offset += len;
    }
    if pending.is_some() {
        report.incomplete_batches += 1;
    }
    report.entities = index.len();
    Ok(Replay { index, report })
}

struct Journal {
    device: Box<dyn StorageBackend>,
    index: HashMap<EntityReference, Slot>,
    batches: u64,
}

impl Journal {
    fn append(&mut self, frame: &Frame) -> CoreResult<u64> {
        let bytes = frame.encode()?;
        Ok(self.device.append(&bytes)?)
    }

    /// Writes a batch and returns the index updates it implies.
    fn write_batch(
        &mut self,
        batch: &StagedBatch,
        sync: bool,
    ) -> CoreResult<Vec<(EntityReference, Option<Slot>)>> {
        let changes = u32::try_from(batch.changes.len())
            .map_err(|_| CoreError::entity_store("batch too large for the journal"))?;
        self.append(&Frame::Begin(BeginPayload {
            session: batch.session.clone(),
            version: batch.version.clone(),
            time: Utc::now(),
            changes,
        }))?;
        let mut updates = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            match change {
                Change::Put(record) => {
                    let offset = self.append(&Frame::Put(record.clone()))?;
                    updates.push((
                        record.reference.clone(),
                        Some(Slot {
                            offset,
                            version: record.version.clone(),
                        }),
                    ));
                }
                Change::Remove(reference) => {
                    self.append(&Frame::Remove(RemovePayload {
                        reference: reference.clone(),
                    }))?;
                    updates.push((reference.clone(), None));
                }
            }
        }
        self.append(&Frame::Commit(CommitPayload {
            session: batch.session.clone(),
        }))?;
        self.device.flush()?;
        if sync {
            self.device.sync()?;
        }
        Ok(updates)
    }

    fn load(&self, reference: &EntityReference) -> CoreResult<EntityState> {
        let slot = self
            .index
            .get(reference)
            .ok_or_else(|| CoreError::no_such_entity(reference))?;
        self.load_at(slot.offset)
    }

    fn load_at(&self, offset: u64) -> CoreResult<EntityState> {
        let end = self.device.size()?;
        match read_frame(self.device.as_ref(), offset, end)? {
            Some((Frame::Put(record), _)) => Ok(EntityState::from_record(record)),
            _ => Err(CoreError::corruption(offset, "index does not point at a put frame")),
        }
    }
}

/// Entity store persisting every committed batch to an append-only journal.
pub struct JournalEntityStore {
    config: Config,
    journal: Mutex<Journal>,
}

impl std::fmt::Debug for JournalEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let journal = self.journal.lock();
        f.debug_struct("JournalEntityStore")
            .field("entities", &journal.index.len())
            .field("batches", &journal.batches)
            .finish_non_exhaustive()
    }
}

impl JournalEntityStore {
    /// Opens a store over `device`, replaying committed batches and
    /// truncating any torn tail.
    pub fn open(device: impl StorageBackend + 'static, config: Config) -> CoreResult<Self> {
        let mut device: Box<dyn StorageBackend> = Box::new(device);
        let Replay { index, report } = replay(device.as_ref())?;
        if !report.is_clean() {
            tracing::warn!(
                torn_bytes = report.torn_bytes(),
                incomplete_batches = report.incomplete_batches,
                "truncating journal to last committed batch"
            );
            device.truncate(report.committed_size)?;
        }
        tracing::debug!(
            batches = report.batches,
            entities = report.entities,
            "opened journal"
        );
        Ok(Self {
            config,
            journal: Mutex::new(Journal {
                device,
                index,
                batches: report.batches,
            }),
        })
    }

    /// Opens a file-backed store.
    pub fn open_path(path: &Path, config: Config) -> CoreResult<Self> {
        let device = if config.create_if_missing {
            FileBackend::open_with_create_dirs(path)?
        } else {
            FileBackend::open_existing(path)?
        };
        Self::open(device, config)
    }

    /// Creates a store over a fresh in-memory device.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            config: Config::default(),
            journal: Mutex::new(Journal {
                device: Box::new(InMemoryBackend::new()),
                index: HashMap::new(),
                batches: 0,
            }),
        }
    }

    /// Scans a device without modifying it.
    pub fn verify(device: &dyn StorageBackend) -> CoreResult<JournalReport> {
        Ok(replay(device)?.report)
    }

    /// Returns a report describing the open journal.
    pub fn report(&self) -> CoreResult<JournalReport> {
        let journal = self.journal.lock();
        let size = journal.device.size()?;
        Ok(JournalReport {
            batches: journal.batches,
            entities: journal.index.len(),
            size,
            committed_size: size,
            incomplete_batches: 0,
        })
    }

    /// Writes the live entities into the empty device `target` as a single
    /// batch and opens a store over it.
    ///
    /// Stored versions are preserved.
    pub fn compact_into(
        &self,
        target: impl StorageBackend + 'static,
    ) -> CoreResult<JournalEntityStore> {
        if target.size()? != 0 {
            return Err(CoreError::invalid_operation("compaction target is not empty"));
        }
        let journal = self.journal.lock();
        let mut changes = Vec::with_capacity(journal.index.len());
        for slot in journal.index.values() {
            let state = journal.load_at(slot.offset)?;
            changes.push(Change::Put(
                state.to_record(state.version().clone(), state.last_modified()),
            ));
        }
        drop(journal);

        let batch = StagedBatch {
            session: uuid::Uuid::new_v4().to_string(),
            version: Version::empty(),
            changes,
            expectations: Vec::new(),
        };
        let mut compacted = Journal {
            device: Box::new(target),
            index: HashMap::new(),
            batches: 0,
        };
        if !batch.changes.is_empty() {
            for (reference, slot) in compacted.write_batch(&batch, true)? {
                if let Some(slot) = slot {
                    compacted.index.insert(reference, slot);
                }
            }
            compacted.batches = 1;
        }
        tracing::debug!(entities = compacted.index.len(), "compacted journal");
        Ok(Self {
            config: self.config.clone(),
            journal: Mutex::new(compacted),
        })
    }

    fn commit_batch(&self, batch: &StagedBatch) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        batch.validate(|reference| journal.index.get(reference).map(|s| s.version.clone()))?;

        let start = journal.device.size()?;
        match journal.write_batch(batch, self.config.sync_on_commit) {
            Ok(updates) => {
                for (reference, slot) in updates {
                    match slot {
                        Some(slot) => journal.index.insert(reference, slot),
                        None => journal.index.remove(&reference),
                    };
                }
                journal.batches += 1;
                tracing::debug!(
                    session = %batch.session,
                    changes = batch.changes.len(),
                    "committed batch to journal"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(truncate_err) = journal.device.truncate(start) {
                    tracing::warn!(error = %truncate_err, "failed to roll back partial batch");
                }
                Err(err)
            }
        }
    }
}

impl EntityStore for JournalEntityStore {
    fn entity_states(&self) -> CoreResult<EntityStates<'_>> {
        let offsets: Vec<u64> = self.journal.lock().index.values().map(|s| s.offset).collect();
        Ok(Box::new(
            offsets
                .into_iter()
                .map(move |offset| self.journal.lock().load_at(offset)),
        ))
    }

    fn entity_state_of(
        &self,
        _uow: &EntityStoreUnitOfWork,
        reference: &EntityReference,
    ) -> CoreResult<EntityState> {
        self.journal.lock().load(reference)
    }

    fn version_of(&self, _uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<Version> {
        self.journal
            .lock()
            .index
            .get(reference)
            .map(|slot| slot.version.clone())
            .ok_or_else(|| CoreError::no_such_entity(reference))
    }

    fn apply_changes(
        &self,
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
    ) -> CoreResult<Box<dyn StateCommitter + '_>> {
        let batch = StagedBatch::stage(uow, states, &self.config)?;
        Ok(Box::new(JournalCommitter { store: self, batch }))
    }
}

struct JournalCommitter<'a> {
    store: &'a JournalEntityStore,
    batch: StagedBatch,
}

impl StateCommitter for JournalCommitter<'_> {
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
    use tempfile::tempdir;
    use unitas_storage::{FaultInjectingBackend, FaultPlan};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Doc").property("title", "").build()
    }

    fn title() -> QualifiedName {
        QualifiedName::new("Doc", "title")
    }

    fn put(store: &JournalEntityStore, id: &str, text: &str) -> CoreResult<()> {
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now())?;
        let reference = EntityReference::parse(id);
        let mut state = match store.entity_state_of(&uow, &reference) {
            Ok(state) => state,
            Err(_) => store.new_entity_state(&uow, reference, &descriptor())?,
        };
        state.set_property(title(), Value::from(text))?;
        store.apply_changes(&uow, vec![state])?.commit()
    }

    fn read(store: &JournalEntityStore, id: &str) -> CoreResult<Value> {
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now())?;
        let state = store.entity_state_of(&uow, &EntityReference::parse(id))?;
        Ok(state.property(&title()).cloned().unwrap_or(Value::Null))
    }

    #[test]
    fn committed_batches_survive_reopen() {
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(device.clone(), Config::default()).unwrap();
        put(&store, "a", "first").unwrap();
        put(&store, "a", "second").unwrap();
        put(&store, "b", "other").unwrap();
        drop(store);

        let store = JournalEntityStore::open(device, Config::default()).unwrap();
        assert_eq!(read(&store, "a").unwrap(), Value::from("second"));
        assert_eq!(read(&store, "b").unwrap(), Value::from("other"));
        assert_eq!(store.report().unwrap().batches, 3);
    }

    #[test]
    fn qualified_names_with_colon_in_type_survive_reopen() {
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(device.clone(), Config::default()).unwrap();
        let doc = EntityDescriptor::builder("app:Doc").property("title", "").build();
        let name = QualifiedName::new("app:Doc", "title");
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let mut state = store
            .new_entity_state(&uow, EntityReference::parse("d1"), &doc)
            .unwrap();
        state.set_property(name.clone(), Value::from("kept")).unwrap();
        store.apply_changes(&uow, vec![state]).unwrap().commit().unwrap();
        drop(store);

        let store = JournalEntityStore::open(device, Config::default()).unwrap();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let state = store.entity_state_of(&uow, &EntityReference::parse("d1")).unwrap();
        assert_eq!(state.property(&name), Some(&Value::from("kept")));
        assert_eq!(state.entity_type(), "app:Doc");
    }

    #[test]
    fn removal_is_replayed() {
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(device.clone(), Config::default()).unwrap();
        put(&store, "a", "x").unwrap();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let mut state = store.entity_state_of(&uow, &EntityReference::parse("a")).unwrap();
        state.remove().unwrap();
        store.apply_changes(&uow, vec![state]).unwrap().commit().unwrap();
        drop(store);

        let store = JournalEntityStore::open(device, Config::default()).unwrap();
        assert!(read(&store, "a").unwrap_err().is_no_such_entity());
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(device.clone(), Config::default()).unwrap();
        put(&store, "a", "kept").unwrap();
        let committed = device.snapshot().len();
        put(&store, "b", "torn").unwrap();
        drop(store);

        let mut bytes = device.snapshot();
        bytes.truncate(bytes.len() - 3);
        let torn = InMemoryBackend::with_data(bytes);

        let report = JournalEntityStore::verify(&torn).unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.committed_size, committed as u64);
        assert!(!report.is_clean());

        let store = JournalEntityStore::open(torn.clone(), Config::default()).unwrap();
        assert_eq!(torn.snapshot().len(), committed);
        assert_eq!(read(&store, "a").unwrap(), Value::from("kept"));
        assert!(read(&store, "b").is_err());
    }

    #[test]
    fn failed_commit_rolls_back_device() {
        let plan = FaultPlan::new();
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(
            FaultInjectingBackend::new(device.clone(), plan.clone()),
            Config::default(),
        )
        .unwrap();
        put(&store, "a", "one").unwrap();
        let before = device.snapshot();

        plan.fail_appends_after(2);
        let err = put(&store, "a", "two").unwrap_err();
        assert!(err.is_entity_store_failure());
        assert_eq!(device.snapshot(), before);

        plan.heal();
        assert_eq!(read(&store, "a").unwrap(), Value::from("one"));
        put(&store, "a", "three").unwrap();
        drop(store);
        let store = JournalEntityStore::open(device, Config::default()).unwrap();
        assert_eq!(read(&store, "a").unwrap(), Value::from("three"));
    }

    #[test]
    fn failed_flush_rolls_back_device() {
        let plan = FaultPlan::new();
        let device = InMemoryBackend::new();
        let store = JournalEntityStore::open(
            FaultInjectingBackend::new(device.clone(), plan.clone()),
            Config::default(),
        )
        .unwrap();
        plan.fail_flushes();
        assert!(put(&store, "a", "one").is_err());
        assert!(device.snapshot().is_empty());
        assert!(read(&store, "a").unwrap_err().is_no_such_entity());
    }

    #[test]
    fn stale_version_is_rejected_before_writing() {
        let store = JournalEntityStore::in_memory();
        put(&store, "a", "one").unwrap();
        let first = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let second = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let reference = EntityReference::parse("a");
        let mut a = store.entity_state_of(&first, &reference).unwrap();
        let mut b = store.entity_state_of(&second, &reference).unwrap();
        a.touch().unwrap();
        b.touch().unwrap();
        store.apply_changes(&first, vec![a]).unwrap().commit().unwrap();
        let size = store.report().unwrap().size;
        let err = store.apply_changes(&second, vec![b]).unwrap().commit().unwrap_err();
        assert!(err.is_concurrent_modification());
        assert_eq!(store.report().unwrap().size, size);
    }

    #[test]
    fn compaction_keeps_live_set_and_versions() {
        let store = JournalEntityStore::in_memory();
        for i in 0..5 {
            put(&store, "a", &format!("rev{i}")).unwrap();
        }
        put(&store, "b", "b").unwrap();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let version = store.version_of(&uow, &EntityReference::parse("a")).unwrap();

        let target = InMemoryBackend::new();
        let compacted = store.compact_into(target.clone()).unwrap();
        assert!(target.snapshot().len() < store.report().unwrap().size as usize);
        assert_eq!(read(&compacted, "a").unwrap(), Value::from("rev4"));
        assert_eq!(compacted.version_of(&uow, &EntityReference::parse("a")).unwrap(), version);

        let reopened = JournalEntityStore::open(target, Config::default()).unwrap();
        assert_eq!(reopened.report().unwrap().entities, 2);
    }

    #[test]
    fn file_store_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("entities.journal");
        {
            let store = JournalEntityStore::open_path(&path, Config::default()).unwrap();
            put(&store, "a", "on disk").unwrap();
        }
        let store =
            JournalEntityStore::open_path(&path, Config::new().create_if_missing(false)).unwrap();
        assert_eq!(read(&store, "a").unwrap(), Value::from("on disk"));
    }

    #[test]
    fn missing_file_without_create_fails() {
        let dir = tempdir().unwrap();
        let config = Config::new().create_if_missing(false);
        assert!(JournalEntityStore::open_path(&dir.path().join("missing"), config).is_err());
    }
}
