//! Untyped and typed views over cached entity states.

use super::{SessionGuard, StateRef};
use crate::entity::{
    AssociationDescriptor, AssociationKind, EntityDescriptor, EntityReference, EntityState,
    EntityStatus, PropertyValue, StateOrigin, Value,
};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A typed entity view.
///
/// Implementations are thin wrappers around an [`EntityHandle`] exposing
/// typed accessors for the properties and associations their descriptor
/// declares.
pub trait Entity: Clone {
    /// Type name recorded in stored states.
    const TYPE_NAME: &'static str;

    /// Declared shape of the type.
    fn descriptor() -> EntityDescriptor;

    /// Wraps a handle. The handle's type is guaranteed to be `TYPE_NAME`.
    fn from_handle(handle: EntityHandle) -> Self;

    /// Returns the wrapped handle.
    fn handle(&self) -> &EntityHandle;

    /// Returns the entity reference.
    fn reference(&self) -> EntityReference {
        self.handle().reference().clone()
    }
}

/// Engine-facing view over one cached [`EntityState`].
///
/// Every accessor is checked against the entity's descriptor by simple name.
/// Writes require an open session.
#[derive(Clone)]
pub struct EntityHandle {
    reference: EntityReference,
    state: StateRef,
    descriptor: Arc<EntityDescriptor>,
    session: SessionGuard,
    retired: Option<Rc<Cell<bool>>>,
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("reference", &self.reference)
            .field("type", &self.descriptor.type_name())
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference && Rc::ptr_eq(&self.state, &other.state)
    }
}

impl EntityHandle {
    pub(crate) fn new(state: StateRef, descriptor: Arc<EntityDescriptor>, session: SessionGuard) -> Self {
        let reference = state.borrow().reference().clone();
        Self {
            reference,
            state,
            descriptor,
            session,
            retired: None,
        }
    }

    pub(crate) fn prototype(
        state: StateRef,
        descriptor: Arc<EntityDescriptor>,
        session: SessionGuard,
        retired: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            retired: Some(retired),
            ..Self::new(state, descriptor, session)
        }
    }

    pub(crate) fn session(&self) -> &SessionGuard {
        &self.session
    }

    pub(crate) fn state_ref(&self) -> &StateRef {
        &self.state
    }

    /// Returns the entity reference.
    #[must_use]
    pub const fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Returns the descriptor of the entity's type.
    #[must_use]
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.descriptor.type_name()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> EntityStatus {
        self.state.borrow().status()
    }

    /// Returns the version read at load time.
    #[must_use]
    pub fn version(&self) -> Version {
        self.state.borrow().version().clone()
    }

    /// Returns the last-modified time.
    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.state.borrow().last_modified()
    }

    /// Runs `f` with read access to the underlying state.
    pub fn with_state<R>(&self, f: impl FnOnce(&EntityState) -> R) -> R {
        f(&self.state.borrow())
    }

    fn check_write(&self) -> CoreResult<()> {
        self.session.check_active()?;
        if self.retired.as_ref().is_some_and(|r| r.get()) {
            return Err(CoreError::invalid_operation("entity builder has already been used"));
        }
        Ok(())
    }

    fn association_descriptor(&self, name: &str, kind: AssociationKind) -> CoreResult<&AssociationDescriptor> {
        self.descriptor.association(name, kind)
    }

    // ---- properties ----

    /// Reads a property, converting it to `V`. Unset properties read as the
    /// declared default.
    pub fn property<V: PropertyValue>(&self, name: &str) -> CoreResult<V> {
        self.session.check_not_closed()?;
        let descriptor = self.descriptor.property(name)?;
        let value = self
            .state
            .borrow()
            .property(descriptor.name())
            .cloned()
            .unwrap_or_else(|| descriptor.default_value().clone());
        V::from_value(value)
    }

    /// Writes a property. Immutable properties can only be written while
    /// building.
    pub fn set_property<V: PropertyValue>(&self, name: &str, value: V) -> CoreResult<()> {
        self.set_property_value(name, value.into_value())
    }

    /// Writes a raw property value.
    pub fn set_property_value(&self, name: &str, value: Value) -> CoreResult<()> {
        self.check_write()?;
        let descriptor = self.descriptor.property(name)?;
        let mut state = self.state.borrow_mut();
        if descriptor.is_immutable() && state.origin() != StateOrigin::Builder {
            return Err(CoreError::invalid_operation(format!(
                "property {} is immutable",
                descriptor.name()
            )));
        }
        state.set_property(descriptor.name().clone(), value)
    }

    // ---- single associations ----

    /// Returns the target of a single association.
    pub fn association(&self, name: &str) -> CoreResult<Option<EntityReference>> {
        self.session.check_not_closed()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Single)?;
        Ok(self.state.borrow().association(descriptor.name()).cloned())
    }

    /// Sets or clears a single association.
    pub fn set_association(&self, name: &str, target: Option<EntityReference>) -> CoreResult<()> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Single)?;
        if target.is_none() && !descriptor.is_optional() {
            return Err(CoreError::invalid_operation(format!(
                "association {} is not optional",
                descriptor.name()
            )));
        }
        self.state
            .borrow_mut()
            .set_association(descriptor.name().clone(), target)
    }

    // ---- many-associations ----

    /// Returns the references of a many-association in order.
    pub fn many_association(&self, name: &str) -> CoreResult<Vec<EntityReference>> {
        self.session.check_not_closed()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Many)?;
        Ok(self.state.borrow().many_association(descriptor.name()).to_vec())
    }

    /// Inserts a reference at `index`. Returns false without writing if the
    /// association is unique and already holds the reference.
    pub fn add_many_association(&self, name: &str, index: usize, target: EntityReference) -> CoreResult<bool> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Many)?;
        let mut state = self.state.borrow_mut();
        if descriptor.is_unique() && state.many_association(descriptor.name()).contains(&target) {
            return Ok(false);
        }
        state.add_many_association(descriptor.name().clone(), index, target)?;
        Ok(true)
    }

    /// Removes the first occurrence of `target`.
    pub fn remove_many_association(&self, name: &str, target: &EntityReference) -> CoreResult<bool> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Many)?;
        self.state
            .borrow_mut()
            .remove_many_association(descriptor.name(), target)
    }

    /// Removes every reference.
    pub fn clear_many_association(&self, name: &str) -> CoreResult<()> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Many)?;
        self.state.borrow_mut().clear_many_association(descriptor.name())
    }

    // ---- named associations ----

    /// Returns the entries of a named association.
    pub fn named_association(&self, name: &str) -> CoreResult<BTreeMap<String, EntityReference>> {
        self.session.check_not_closed()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Named)?;
        Ok(self
            .state
            .borrow()
            .named_association(descriptor.name())
            .cloned()
            .unwrap_or_default())
    }

    /// Maps `key` to `target`, returning whether an entry was overwritten.
    pub fn put_named_association(&self, name: &str, key: &str, target: EntityReference) -> CoreResult<bool> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Named)?;
        self.state
            .borrow_mut()
            .put_named_association(descriptor.name().clone(), key, target)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove_named_association(&self, name: &str, key: &str) -> CoreResult<bool> {
        self.check_write()?;
        let descriptor = self.association_descriptor(name, AssociationKind::Named)?;
        self.state
            .borrow_mut()
            .remove_named_association(descriptor.name(), key)
    }

    /// References held by an association of any kind, in declaration order.
    pub(crate) fn targets_of(state: &EntityState, descriptor: &AssociationDescriptor) -> Vec<EntityReference> {
        match descriptor.kind() {
            AssociationKind::Single => state.association(descriptor.name()).cloned().into_iter().collect(),
            AssociationKind::Many => state.many_association(descriptor.name()).to_vec(),
            AssociationKind::Named => state
                .named_association(descriptor.name())
                .map(|entries| entries.values().cloned().collect())
                .unwrap_or_default(),
        }
    }
}
