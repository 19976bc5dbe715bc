//! Entity store over a hierarchical string key/value tree.
//!
//! Each entity is a child node of the root named by its identity:
//!
//! ```text
//! <identity>/
//!   type, modified              values
//!   properties/               qualified name -> JSON value
//!   associations/             qualified name -> reference
//!   manyassociations/         qualified name -> references, one per line
//!   namedassociations/        qualified name -> name and reference lines, alternating
//! ```
//!
//! The tree has no version concept, so every state carries the empty version
//! and concurrent modification is never detected.

use super::{Change, EntityStates, EntityStore, EntityStoreUnitOfWork, StagedBatch, StateCommitter};
use crate::config::Config;
use crate::entity::{EntityRecord, EntityReference, EntityState, QualifiedName, Value};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TYPE_KEY: &str = "type";
const MODIFIED_KEY: &str = "modified";
const PROPERTIES: &str = "properties";
const ASSOCIATIONS: &str = "associations";
const MANY_ASSOCIATIONS: &str = "manyassociations";
const NAMED_ASSOCIATIONS: &str = "namedassociations";

/// A node of string values with named children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceNode {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, PreferenceNode>,
}

impl PreferenceNode {
    /// Creates an empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Sets a value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Iterates over values in key order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a child node.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&PreferenceNode> {
        self.children.get(name)
    }

    /// Returns a child node, creating it if missing.
    pub fn child_mut(&mut self, name: &str) -> &mut PreferenceNode {
        self.children.entry(name.to_string()).or_default()
    }

    /// Removes a child node; returns whether it existed.
    pub fn remove_child(&mut self, name: &str) -> bool {
        self.children.remove(name).is_some()
    }

    /// Iterates over child names in order.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

fn write_entity(root: &mut PreferenceNode, record: &EntityRecord) -> CoreResult<()> {
    let mut node = PreferenceNode::new();
    node.put(TYPE_KEY, record.entity_type.clone());
    node.put(MODIFIED_KEY, record.last_modified.to_rfc3339());

    if !record.properties.is_empty() {
        let properties = node.child_mut(PROPERTIES);
        for (name, value) in &record.properties {
            properties.put(name.to_string(), serde_json::to_string(value)?);
        }
    }
    if !record.associations.is_empty() {
        let associations = node.child_mut(ASSOCIATIONS);
        for (name, target) in &record.associations {
            associations.put(name.to_string(), target.as_str());
        }
    }
    if !record.many_associations.is_empty() {
        let many = node.child_mut(MANY_ASSOCIATIONS);
        for (name, targets) in &record.many_associations {
            let joined = targets
                .iter()
                .map(|target| single_line(record, name, target.as_str()))
                .collect::<CoreResult<Vec<_>>>()?;
            many.put(name.to_string(), joined.join("\n"));
        }
    }
    if !record.named_associations.is_empty() {
        let named = node.child_mut(NAMED_ASSOCIATIONS);
        for (name, entries) in &record.named_associations {
            let mut lines = Vec::with_capacity(entries.len() * 2);
            for (key, target) in entries {
                lines.push(single_line(record, name, key)?);
                lines.push(single_line(record, name, target.as_str())?);
            }
            named.put(name.to_string(), lines.join("\n"));
        }
    }

    root.children.insert(record.reference.as_str().to_string(), node);
    Ok(())
}

/// Association values are stored one per line, so a line break inside a
/// key or reference would change what is read back.
fn single_line<'a>(record: &EntityRecord, name: &QualifiedName, text: &'a str) -> CoreResult<&'a str> {
    if text.contains(['\n', '\r']) {
        return Err(CoreError::entity_store(format!(
            "association {name} of {} holds {text:?}, which contains a line break",
            record.reference
        )));
    }
    Ok(text)
}

fn read_entity(reference: &EntityReference, node: &PreferenceNode) -> CoreResult<EntityRecord> {
    let entity_type = node
        .get(TYPE_KEY)
        .ok_or_else(|| CoreError::codec(format!("entity {reference} has no type")))?
        .to_string();
    let last_modified = node
        .get(MODIFIED_KEY)
        .map(DateTime::parse_from_rfc3339)
        .transpose()
        .map_err(|e| CoreError::codec(format!("entity {reference}: {e}")))?
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

    let mut record = EntityRecord {
        reference: reference.clone(),
        entity_type,
        version: Version::empty(),
        last_modified,
        properties: BTreeMap::new(),
        associations: BTreeMap::new(),
        many_associations: BTreeMap::new(),
        named_associations: BTreeMap::new(),
    };

    if let Some(properties) = node.child(PROPERTIES) {
        for (name, json) in properties.values() {
            let value: Value = serde_json::from_str(json)?;
            record.properties.insert(name.parse()?, value);
        }
    }
    if let Some(associations) = node.child(ASSOCIATIONS) {
        for (name, target) in associations.values() {
            record
                .associations
                .insert(name.parse()?, EntityReference::parse(target));
        }
    }
    if let Some(many) = node.child(MANY_ASSOCIATIONS) {
        for (name, joined) in many.values() {
            let targets = joined
                .lines()
                .filter(|line| !line.is_empty())
                .map(EntityReference::parse)
                .collect();
            record.many_associations.insert(name.parse()?, targets);
        }
    }
    if let Some(named) = node.child(NAMED_ASSOCIATIONS) {
        for (name, joined) in named.values() {
            let qualified: QualifiedName = name.parse()?;
            let lines: Vec<&str> = joined.lines().collect();
            if lines.len() % 2 != 0 {
                return Err(CoreError::codec(format!(
                    "named association {qualified} of {reference} has an odd number of lines"
                )));
            }
            let entries = lines
                .chunks(2)
                .map(|pair| (pair[0].to_string(), EntityReference::parse(pair[1])))
                .collect();
            record.named_associations.insert(qualified, entries);
        }
    }
    Ok(record)
}

/// Entity store keeping entities in a [`PreferenceNode`] tree, optionally
/// persisted as a JSON file.
#[derive(Debug)]
pub struct PreferencesEntityStore {
    config: Config,
    path: Option<PathBuf>,
    root: Mutex<PreferenceNode>,
}

impl PreferencesEntityStore {
    /// Creates an empty in-memory tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::new().track_versions(false),
            path: None,
            root: Mutex::new(PreferenceNode::new()),
        }
    }

    /// Opens a tree persisted at `path`, creating it on first commit.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let root = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PreferenceNode::new(),
            Err(err) => return Err(unitas_storage::StorageError::from(err).into()),
        };
        Ok(Self {
            config: Config::new().track_versions(false),
            path: Some(path),
            root: Mutex::new(root),
        })
    }

    /// Returns the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a copy of the whole tree.
    #[must_use]
    pub fn snapshot(&self) -> PreferenceNode {
        self.root.lock().clone()
    }

    fn persist(&self, root: &PreferenceNode) -> CoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(root)?;
        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| unitas_storage::StorageError::from(e).into())
    }

    fn commit_batch(&self, batch: &StagedBatch) -> CoreResult<()> {
        let mut root = self.root.lock();
        batch.validate(|reference| {
            root.child(reference.as_str())
                .map(|_| Version::empty())
        })?;

        let mut updated = root.clone();
        for change in &batch.changes {
            match change {
                Change::Put(record) => write_entity(&mut updated, record)?,
                Change::Remove(reference) => {
                    updated.remove_child(reference.as_str());
                }
            }
        }
        self.persist(&updated)?;
        *root = updated;
        tracing::debug!(
            session = %batch.session,
            changes = batch.changes.len(),
            "committed batch to preferences"
        );
        Ok(())
    }
}

impl Default for PreferencesEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for PreferencesEntityStore {
    fn entity_states(&self) -> CoreResult<EntityStates<'_>> {
        let root = self.snapshot();
        let names: Vec<String> = root.child_names().map(str::to_string).collect();
        Ok(Box::new(names.into_iter().filter_map(move |name| {
            let reference = EntityReference::parse(&name);
            root.child(&name)
                .map(|node| read_entity(&reference, node).map(EntityState::from_record))
        })))
    }

    fn entity_state_of(
        &self,
        _uow: &EntityStoreUnitOfWork,
        reference: &EntityReference,
    ) -> CoreResult<EntityState> {
        let root = self.root.lock();
        let node = root
            .child(reference.as_str())
            .ok_or_else(|| CoreError::no_such_entity(reference))?;
        read_entity(reference, node).map(EntityState::from_record)
    }

    fn version_of(&self, _uow: &EntityStoreUnitOfWork, reference: &EntityReference) -> CoreResult<Version> {
        if self.root.lock().child(reference.as_str()).is_some() {
            Ok(Version::empty())
        } else {
            Err(CoreError::no_such_entity(reference))
        }
    }

    fn apply_changes(
        &self,
        uow: &EntityStoreUnitOfWork,
        states: Vec<EntityState>,
    ) -> CoreResult<Box<dyn StateCommitter + '_>> {
        let batch = StagedBatch::stage(uow, states, &self.config)?;
        Ok(Box::new(PreferencesCommitter { store: self, batch }))
    }
}

struct PreferencesCommitter<'a> {
    store: &'a PreferencesEntityStore,
    batch: StagedBatch,
}

impl StateCommitter for PreferencesCommitter<'_> {
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
    use crate::types::Usecase;
    use tempfile::tempdir;

    fn qn(name: &str) -> QualifiedName {
        QualifiedName::new("Box", name)
    }

    fn sample(uow: &EntityStoreUnitOfWork) -> EntityState {
        let mut state = EntityState::new(EntityReference::parse("box-1"), "Box", uow.current_time());
        state.set_property(qn("label"), Value::from("fragile")).unwrap();
        state.set_property(qn("weight"), Value::Integer(12)).unwrap();
        state
            .set_association(qn("owner"), Some(EntityReference::parse("p1")))
            .unwrap();
        for (i, item) in ["i1", "i2", "i1"].into_iter().enumerate() {
            state
                .add_many_association(qn("items"), i, EntityReference::parse(item))
                .unwrap();
        }
        state
            .put_named_association(qn("slots"), "top", EntityReference::parse("i2"))
            .unwrap();
        state
            .put_named_association(qn("slots"), "bottom", EntityReference::parse("i1"))
            .unwrap();
        state
    }

    fn commit(store: &PreferencesEntityStore, states: Vec<EntityState>) -> CoreResult<()> {
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now())?;
        store.apply_changes(&uow, states)?.commit()
    }

    #[test]
    fn tree_layout_uses_line_joined_references() {
        let store = PreferencesEntityStore::new();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        commit(&store, vec![sample(&uow)]).unwrap();

        let root = store.snapshot();
        let node = root.child("box-1").unwrap();
        assert_eq!(node.get("type"), Some("Box"));
        assert_eq!(
            node.child(MANY_ASSOCIATIONS).unwrap().get("Box:items"),
            Some("i1\ni2\ni1")
        );
        assert_eq!(
            node.child(NAMED_ASSOCIATIONS).unwrap().get("Box:slots"),
            Some("bottom\ni1\ntop\ni2")
        );
        assert_eq!(node.child(ASSOCIATIONS).unwrap().get("Box:owner"), Some("p1"));
    }

    #[test]
    fn states_round_trip_without_versions() {
        let store = PreferencesEntityStore::new();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        let original = sample(&uow);
        commit(&store, vec![original.clone()]).unwrap();

        let loaded = store.entity_state_of(&uow, original.reference()).unwrap();
        assert!(loaded.same_contents(&original));
        assert!(loaded.version().is_empty());
        assert!(store.version_of(&uow, original.reference()).unwrap().is_empty());
    }

    #[test]
    fn line_breaks_in_named_keys_fail_the_whole_commit() {
        let store = PreferencesEntityStore::new();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        commit(&store, vec![sample(&uow)]).unwrap();
        let before = store.snapshot();

        for key in ["top\nleft", "top\r"] {
            let mut other = EntityState::new(EntityReference::parse("box-2"), "Box", uow.current_time());
            other
                .put_named_association(qn("slots"), key, EntityReference::parse("i1"))
                .unwrap();
            let err = commit(&store, vec![other]).unwrap_err();
            assert!(err.is_entity_store_failure(), "{err}");
            assert_eq!(store.snapshot(), before);
        }

        let mut bad_target = EntityState::new(EntityReference::parse("box-3"), "Box", uow.current_time());
        bad_target
            .add_many_association(qn("items"), 0, EntityReference::parse("i1\ni2"))
            .unwrap();
        assert!(commit(&store, vec![bad_target]).is_err());

        let kept = store.entity_state_of(&uow, &EntityReference::parse("box-1")).unwrap();
        assert_eq!(kept.named_association(&qn("slots")).map(BTreeMap::len), Some(2));
        assert!(store
            .entity_state_of(&uow, &EntityReference::parse("box-2"))
            .unwrap_err()
            .is_no_such_entity());
    }

    #[test]
    fn concurrent_updates_are_not_detected() {
        let store = PreferencesEntityStore::new();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        commit(&store, vec![sample(&uow)]).unwrap();
        let reference = EntityReference::parse("box-1");
        let mut a = store.entity_state_of(&uow, &reference).unwrap();
        let mut b = store.entity_state_of(&uow, &reference).unwrap();
        a.set_property(qn("label"), Value::from("a")).unwrap();
        b.set_property(qn("label"), Value::from("b")).unwrap();
        commit(&store, vec![a]).unwrap();
        commit(&store, vec![b]).unwrap();
        let last = store.entity_state_of(&uow, &reference).unwrap();
        assert_eq!(last.property(&qn("label")), Some(&Value::from("b")));
    }

    #[test]
    fn creating_an_existing_node_fails() {
        let store = PreferencesEntityStore::new();
        let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
        commit(&store, vec![sample(&uow)]).unwrap();
        let err = commit(&store, vec![sample(&uow)]).unwrap_err();
        assert!(matches!(err, CoreError::EntityAlreadyExists { .. }));
    }

    #[test]
    fn file_tree_persists_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        {
            let store = PreferencesEntityStore::open(&path).unwrap();
            let uow = store.new_unit_of_work(Usecase::default(), Utc::now()).unwrap();
            commit(&store, vec![sample(&uow)]).unwrap();
        }
        let store = PreferencesEntityStore::open(&path).unwrap();
        assert_eq!(store.entity_states().unwrap().count(), 1);
        assert!(!dir.path().join("prefs.tmp").exists());
    }
}
