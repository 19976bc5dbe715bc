//! Per-entity mutable state and its status machine.
//!
//! ```text
//! NEW ─────────────────────────────┐
//!  │ (persisted at completion)     ▼
//! LOADED ──(any write)──▶ UPDATED ──▶ REMOVED (terminal)
//!  └───────────────────────────────▲
//! ```
//!
//! A write to a `LOADED` state flips it to `UPDATED`; a write to a `REMOVED`
//! state fails. The version is assigned only by a store, through the record a
//! state is loaded from.

use super::identity::EntityReference;
use super::value::{QualifiedName, Value};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an entity state within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityStatus {
    /// Created in this session, not yet visible to other sessions.
    New,
    /// Loaded from the store and unmodified.
    Loaded,
    /// Loaded and modified.
    Updated,
    /// Marked for deletion.
    Removed,
}

impl EntityStatus {
    /// Returns true if the state must be handed to the store at completion.
    #[must_use]
    pub const fn is_changed(self) -> bool {
        !matches!(self, Self::Loaded)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Loaded => "LOADED",
            Self::Updated => "UPDATED",
            Self::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// How a state came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateOrigin {
    /// Prototype held by an entity builder; never part of a session cache.
    Builder,
    /// Allocated by a store for a new entity in this session.
    Created,
    /// Loaded from a stored record.
    Loaded,
}

/// Persisted form of an entity, as stores write and read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity reference.
    pub reference: EntityReference,
    /// Declared entity type name.
    pub entity_type: String,
    /// Version assigned by the store at the last commit.
    pub version: Version,
    /// Time of the last commit that touched the entity.
    pub last_modified: DateTime<Utc>,
    /// Property values.
    #[serde(default)]
    pub properties: BTreeMap<QualifiedName, Value>,
    /// Non-null single associations.
    #[serde(default)]
    pub associations: BTreeMap<QualifiedName, EntityReference>,
    /// Many-associations in order.
    #[serde(default)]
    pub many_associations: BTreeMap<QualifiedName, Vec<EntityReference>>,
    /// Named associations.
    #[serde(default)]
    pub named_associations: BTreeMap<QualifiedName, BTreeMap<String, EntityReference>>,
}

/// The authoritative in-memory record of one entity within one session.
#[derive(Debug, Clone)]
pub struct EntityState {
    reference: EntityReference,
    entity_type: String,
    status: EntityStatus,
    origin: StateOrigin,
    version: Version,
    last_modified: DateTime<Utc>,
    properties: BTreeMap<QualifiedName, Value>,
    associations: BTreeMap<QualifiedName, Option<EntityReference>>,
    many_associations: BTreeMap<QualifiedName, Vec<EntityReference>>,
    named_associations: BTreeMap<QualifiedName, BTreeMap<String, EntityReference>>,
}

impl EntityState {
    /// Creates an empty `NEW` state for an entity that has never been stored.
    #[must_use]
    pub fn new(
        reference: EntityReference,
        entity_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            entity_type: entity_type.into(),
            status: EntityStatus::New,
            origin: StateOrigin::Created,
            version: Version::empty(),
            last_modified: created_at,
            properties: BTreeMap::new(),
            associations: BTreeMap::new(),
            many_associations: BTreeMap::new(),
            named_associations: BTreeMap::new(),
        }
    }

    /// Creates a builder prototype state.
    #[must_use]
    pub(crate) fn prototype(
        reference: EntityReference,
        entity_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            origin: StateOrigin::Builder,
            ..Self::new(reference, entity_type, created_at)
        }
    }

    /// Rebuilds a `LOADED` state from its stored record.
    #[must_use]
    pub fn from_record(record: EntityRecord) -> Self {
        Self {
            reference: record.reference,
            entity_type: record.entity_type,
            status: EntityStatus::Loaded,
            origin: StateOrigin::Loaded,
            version: record.version,
            last_modified: record.last_modified,
            properties: record.properties,
            associations: record
                .associations
                .into_iter()
                .map(|(name, r)| (name, Some(r)))
                .collect(),
            many_associations: record.many_associations,
            named_associations: record.named_associations,
        }
    }

    /// Produces the record a store persists for this state, stamped with the
    /// version and time of the commit that writes it.
    #[must_use]
    pub fn to_record(&self, version: Version, last_modified: DateTime<Utc>) -> EntityRecord {
        EntityRecord {
            reference: self.reference.clone(),
            entity_type: self.entity_type.clone(),
            version,
            last_modified,
            properties: self.properties.clone(),
            associations: self
                .associations
                .iter()
                .filter_map(|(name, r)| r.clone().map(|r| (name.clone(), r)))
                .collect(),
            many_associations: self.many_associations.clone(),
            named_associations: self.named_associations.clone(),
        }
    }

    /// Returns the entity reference.
    #[must_use]
    pub const fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Returns the declared entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> EntityStatus {
        self.status
    }

    /// Returns how this state was created.
    #[must_use]
    pub const fn origin(&self) -> StateOrigin {
        self.origin
    }

    /// Returns the version read when the state was loaded.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the last-modified time.
    #[must_use]
    pub const fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Returns true once the state is marked for deletion.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self.status, EntityStatus::Removed)
    }

    // ---- reads ----

    /// Returns a property value, if set.
    #[must_use]
    pub fn property(&self, name: &QualifiedName) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Iterates over all property values.
    pub fn properties(&self) -> impl Iterator<Item = (&QualifiedName, &Value)> {
        self.properties.iter()
    }

    /// Returns the target of a single association, if set.
    #[must_use]
    pub fn association(&self, name: &QualifiedName) -> Option<&EntityReference> {
        self.associations.get(name).and_then(Option::as_ref)
    }

    /// Iterates over all non-null single associations.
    pub fn associations(&self) -> impl Iterator<Item = (&QualifiedName, &EntityReference)> {
        self.associations
            .iter()
            .filter_map(|(name, r)| r.as_ref().map(|r| (name, r)))
    }

    /// Returns the references of a many-association in order.
    #[must_use]
    pub fn many_association(&self, name: &QualifiedName) -> &[EntityReference] {
        self.many_associations.get(name).map_or(&[][..], Vec::as_slice)
    }

    /// Iterates over all many-associations.
    pub fn many_associations(&self) -> impl Iterator<Item = (&QualifiedName, &[EntityReference])> {
        self.many_associations
            .iter()
            .map(|(name, refs)| (name, refs.as_slice()))
    }

    /// Returns the entries of a named association.
    #[must_use]
    pub fn named_association(&self, name: &QualifiedName) -> Option<&BTreeMap<String, EntityReference>> {
        self.named_associations.get(name)
    }

    /// Iterates over all named associations.
    pub fn named_associations(
        &self,
    ) -> impl Iterator<Item = (&QualifiedName, &BTreeMap<String, EntityReference>)> {
        self.named_associations.iter()
    }

    // ---- writes ----

    fn begin_write(&mut self) -> CoreResult<()> {
        match self.status {
            EntityStatus::Removed => Err(CoreError::no_such_entity(&self.reference)),
            EntityStatus::Loaded => {
                self.status = EntityStatus::Updated;
                Ok(())
            }
            EntityStatus::New | EntityStatus::Updated => Ok(()),
        }
    }

    /// Marks the state dirty without changing any field.
    pub fn touch(&mut self) -> CoreResult<()> {
        self.begin_write()
    }

    /// Sets a property value. Writing the value already held still marks the
    /// state dirty.
    pub fn set_property(&mut self, name: QualifiedName, value: Value) -> CoreResult<()> {
        self.begin_write()?;
        self.properties.insert(name, value);
        Ok(())
    }

    /// Sets or clears a single association.
    pub fn set_association(
        &mut self,
        name: QualifiedName,
        target: Option<EntityReference>,
    ) -> CoreResult<()> {
        self.begin_write()?;
        self.associations.insert(name, target);
        Ok(())
    }

    /// Inserts a reference into a many-association at `index`.
    pub fn add_many_association(
        &mut self,
        name: QualifiedName,
        index: usize,
        target: EntityReference,
    ) -> CoreResult<()> {
        let len = self.many_association(&name).len();
        if index > len {
            return Err(CoreError::invalid_operation(format!(
                "index {index} out of bounds for {name} of length {len}"
            )));
        }
        self.begin_write()?;
        self.many_associations
            .entry(name)
            .or_default()
            .insert(index, target);
        Ok(())
    }

    /// Removes the first occurrence of `target`; returns whether it was present.
    pub fn remove_many_association(
        &mut self,
        name: &QualifiedName,
        target: &EntityReference,
    ) -> CoreResult<bool> {
        if self.is_removed() {
            return Err(CoreError::no_such_entity(&self.reference));
        }
        let Some(position) = self
            .many_associations
            .get(name)
            .and_then(|refs| refs.iter().position(|r| r == target))
        else {
            return Ok(false);
        };
        self.begin_write()?;
        if let Some(refs) = self.many_associations.get_mut(name) {
            refs.remove(position);
        }
        Ok(true)
    }

    /// Removes every reference from a many-association.
    pub fn clear_many_association(&mut self, name: &QualifiedName) -> CoreResult<()> {
        self.begin_write()?;
        if let Some(refs) = self.many_associations.get_mut(name) {
            refs.clear();
        }
        Ok(())
    }

    /// Maps `key` to `target` in a named association, returning whether a
    /// previous entry was overwritten.
    pub fn put_named_association(
        &mut self,
        name: QualifiedName,
        key: impl Into<String>,
        target: EntityReference,
    ) -> CoreResult<bool> {
        self.begin_write()?;
        let previous = self
            .named_associations
            .entry(name)
            .or_default()
            .insert(key.into(), target);
        Ok(previous.is_some())
    }

    /// Removes `key` from a named association; returns whether it was present.
    pub fn remove_named_association(&mut self, name: &QualifiedName, key: &str) -> CoreResult<bool> {
        if self.is_removed() {
            return Err(CoreError::no_such_entity(&self.reference));
        }
        let present = self
            .named_associations
            .get(name)
            .is_some_and(|entries| entries.contains_key(key));
        if !present {
            return Ok(false);
        }
        self.begin_write()?;
        if let Some(entries) = self.named_associations.get_mut(name) {
            entries.remove(key);
        }
        Ok(true)
    }

    /// Marks the state for deletion.
    ///
    /// Fails if it is already removed.
    pub fn remove(&mut self) -> CoreResult<()> {
        if self.is_removed() {
            return Err(CoreError::no_such_entity(&self.reference));
        }
        self.status = EntityStatus::Removed;
        Ok(())
    }

    /// Copies every field of a builder prototype into this state.
    pub(crate) fn copy_contents_from(&mut self, prototype: &EntityState) {
        self.properties = prototype.properties.clone();
        self.associations = prototype.associations.clone();
        self.many_associations = prototype.many_associations.clone();
        self.named_associations = prototype.named_associations.clone();
    }

    /// Returns true if both states hold the same properties and associations.
    #[must_use]
    pub fn same_contents(&self, other: &EntityState) -> bool {
        self.reference == other.reference
            && self.entity_type == other.entity_type
            && self.properties == other.properties
            && self.associations().eq(other.associations())
            && self.many_associations().eq(other.many_associations())
            && self.named_associations == other.named_associations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn qn(name: &str) -> QualifiedName {
        QualifiedName::new("Test", name)
    }

    fn loaded() -> EntityState {
        let state = EntityState::new(EntityReference::parse("e1"), "Test", Utc::now());
        EntityState::from_record(state.to_record(Version::new("v1"), Utc::now()))
    }

    #[test]
    fn new_state_stays_new_on_write() {
        let mut state = EntityState::new(EntityReference::parse("e1"), "Test", Utc::now());
        state.set_property(qn("name"), Value::from("A")).unwrap();
        assert_eq!(state.status(), EntityStatus::New);
        assert_eq!(state.origin(), StateOrigin::Created);
        assert!(state.version().is_empty());
    }

    #[test]
    fn write_flips_loaded_to_updated() {
        let mut state = loaded();
        assert_eq!(state.status(), EntityStatus::Loaded);
        assert_eq!(state.version(), &Version::new("v1"));
        state.set_property(qn("name"), Value::from("B")).unwrap();
        assert_eq!(state.status(), EntityStatus::Updated);
    }

    #[test]
    fn noop_removals_do_not_dirty() {
        let mut state = loaded();
        assert!(!state
            .remove_many_association(&qn("parts"), &EntityReference::parse("x"))
            .unwrap());
        assert!(!state.remove_named_association(&qn("slots"), "a").unwrap());
        assert_eq!(state.status(), EntityStatus::Loaded);
    }

    #[test]
    fn removed_state_rejects_writes() {
        let mut state = loaded();
        state.remove().unwrap();
        assert!(state.is_removed());
        let err = state.set_property(qn("name"), Value::Null).unwrap_err();
        assert!(err.is_no_such_entity());
        assert!(state.remove().is_err());
        assert!(state
            .put_named_association(qn("slots"), "a", EntityReference::parse("x"))
            .is_err());
    }

    #[test]
    fn many_association_keeps_order_and_duplicates() {
        let mut state = loaded();
        let a = EntityReference::parse("a");
        let b = EntityReference::parse("b");
        state.add_many_association(qn("parts"), 0, a.clone()).unwrap();
        state.add_many_association(qn("parts"), 0, b.clone()).unwrap();
        state.add_many_association(qn("parts"), 2, a.clone()).unwrap();
        assert_eq!(state.many_association(&qn("parts")), &[b.clone(), a.clone(), a.clone()]);

        assert!(state.remove_many_association(&qn("parts"), &a).unwrap());
        assert_eq!(state.many_association(&qn("parts")), &[b, a]);

        let err = state
            .add_many_association(qn("parts"), 5, EntityReference::parse("c"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn put_named_reports_overwrite() {
        let mut state = loaded();
        assert!(!state
            .put_named_association(qn("slots"), "x", EntityReference::parse("a"))
            .unwrap());
        assert!(state
            .put_named_association(qn("slots"), "x", EntityReference::parse("b"))
            .unwrap());
        let entries = state.named_association(&qn("slots")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["x"], EntityReference::parse("b"));
    }

    #[test]
    fn record_round_trip_drops_null_associations() {
        let mut state = EntityState::new(EntityReference::parse("e1"), "Test", Utc::now());
        state.set_association(qn("owner"), None).unwrap();
        state
            .set_association(qn("spouse"), Some(EntityReference::parse("e2")))
            .unwrap();
        let record = state.to_record(Version::new("v9"), Utc::now());
        assert_eq!(record.associations.len(), 1);
        let loaded = EntityState::from_record(record);
        assert!(loaded.same_contents(&state));
        assert_eq!(loaded.association(&qn("owner")), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        SetProperty(i64),
        AddMany(usize),
        PutNamed(u8),
        Remove,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i64>().prop_map(Op::SetProperty),
            (0usize..4).prop_map(Op::AddMany),
            any::<u8>().prop_map(Op::PutNamed),
            Just(Op::Remove),
        ]
    }

    fn rank(status: EntityStatus) -> u8 {
        match status {
            EntityStatus::New | EntityStatus::Loaded => 0,
            EntityStatus::Updated => 1,
            EntityStatus::Removed => 2,
        }
    }

    proptest! {
        #[test]
        fn status_never_regresses(ops in proptest::collection::vec(op(), 0..32)) {
            let mut state = loaded();
            let mut last = rank(state.status());
            for op in ops {
                let was_removed = state.is_removed();
                let result = match op {
                    Op::SetProperty(v) => state.set_property(qn("n"), Value::Integer(v)),
                    Op::AddMany(i) => {
                        let len = state.many_association(&qn("m")).len();
                        state.add_many_association(qn("m"), i.min(len), EntityReference::parse("r"))
                    }
                    Op::PutNamed(k) => state
                        .put_named_association(qn("d"), k.to_string(), EntityReference::parse("r"))
                        .map(|_| ()),
                    Op::Remove => state.remove(),
                };
                if was_removed {
                    prop_assert!(result.is_err());
                }
                let now = rank(state.status());
                prop_assert!(now >= last);
                last = now;
            }
        }
    }
}
