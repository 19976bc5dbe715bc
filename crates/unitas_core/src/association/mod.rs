//! Typed association views.
//!
//! A view holds only its owner's handle and the association name. References
//! are resolved through the caller's [`UnitOfWork`] on access, never when the
//! owner is loaded. A view must be used with the session its owner belongs to.

use crate::entity::{AssociationKind, EntityReference, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::unitofwork::{Entity, EntityHandle, UnitOfWork};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;

fn check_session(owner: &EntityHandle, uow: &UnitOfWork) -> CoreResult<()> {
    if owner.session().same_session(uow.session()) {
        Ok(())
    } else {
        Err(CoreError::unit_of_work(
            "association resolved through a different unit of work",
        ))
    }
}

fn check_target<T: Entity>(owner: &EntityHandle, target: &T) -> CoreResult<()> {
    if owner.session().same_session(target.handle().session()) {
        Ok(())
    } else {
        Err(CoreError::unit_of_work(
            "association target belongs to a different unit of work",
        ))
    }
}

fn check_declared(owner: &EntityHandle, name: &str, kind: AssociationKind) -> CoreResult<()> {
    owner.descriptor().association(name, kind).map(|_| ())
}

/// Zero-or-one reference to a `T`.
///
/// The resolved entity is memoized until the reference changes or the
/// target is removed.
pub struct Association<T: Entity> {
    owner: EntityHandle,
    name: String,
    resolved: RefCell<Option<T>>,
}

impl<T: Entity> Association<T> {
    /// Creates a view over the single association `name` of `owner`.
    pub fn of(owner: &EntityHandle, name: &str) -> CoreResult<Self> {
        check_declared(owner, name, AssociationKind::Single)?;
        Ok(Self {
            owner: owner.clone(),
            name: name.to_string(),
            resolved: RefCell::new(None),
        })
    }

    /// Returns the stored reference without resolving it.
    pub fn reference(&self) -> CoreResult<Option<EntityReference>> {
        self.owner.association(&self.name)
    }

    /// Resolves the referenced entity.
    pub fn get(&self, uow: &UnitOfWork) -> CoreResult<Option<T>> {
        check_session(&self.owner, uow)?;
        let Some(reference) = self.reference()? else {
            return Ok(None);
        };
        if let Some(entity) = self.resolved.borrow().as_ref() {
            let handle = entity.handle();
            if handle.reference() == &reference && handle.status() != EntityStatus::Removed {
                return Ok(Some(entity.clone()));
            }
        }
        let entity = uow.get::<T>(&reference)?;
        *self.resolved.borrow_mut() = Some(entity.clone());
        Ok(Some(entity))
    }

    /// Points the association at `target`, or clears it.
    pub fn set(&self, target: Option<&T>) -> CoreResult<()> {
        if let Some(target) = target {
            check_target(&self.owner, target)?;
        }
        self.owner
            .set_association(&self.name, target.map(Entity::reference))?;
        *self.resolved.borrow_mut() = target.cloned();
        Ok(())
    }
}

/// Ordered sequence of references to `T`s.
pub struct ManyAssociation<T: Entity> {
    owner: EntityHandle,
    name: String,
    _target: PhantomData<T>,
}

impl<T: Entity> ManyAssociation<T> {
    /// Creates a view over the many-association `name` of `owner`.
    pub fn of(owner: &EntityHandle, name: &str) -> CoreResult<Self> {
        check_declared(owner, name, AssociationKind::Many)?;
        Ok(Self {
            owner: owner.clone(),
            name: name.to_string(),
            _target: PhantomData,
        })
    }

    /// Returns the references in order.
    pub fn references(&self) -> CoreResult<Vec<EntityReference>> {
        self.owner.many_association(&self.name)
    }

    /// Returns the number of references.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.references()?.len())
    }

    /// Returns true if `entity` is referenced.
    pub fn contains(&self, entity: &T) -> CoreResult<bool> {
        Ok(self.references()?.contains(entity.handle().reference()))
    }

    /// Resolves the entity at `index`.
    pub fn get(&self, uow: &UnitOfWork, index: usize) -> CoreResult<Option<T>> {
        check_session(&self.owner, uow)?;
        match self.references()?.get(index) {
            Some(reference) => uow.get::<T>(reference).map(Some),
            None => Ok(None),
        }
    }

    /// Inserts `entity` at `index`. Returns false if the association is
    /// unique and already holds it.
    pub fn add(&self, index: usize, entity: &T) -> CoreResult<bool> {
        check_target(&self.owner, entity)?;
        self.owner
            .add_many_association(&self.name, index, entity.reference())
    }

    /// Appends `entity`.
    pub fn push(&self, entity: &T) -> CoreResult<bool> {
        let len = self.count()?;
        self.add(len, entity)
    }

    /// Removes the first occurrence of `entity`.
    pub fn remove(&self, entity: &T) -> CoreResult<bool> {
        self.owner
            .remove_many_association(&self.name, entity.handle().reference())
    }

    /// Removes every reference.
    pub fn clear(&self) -> CoreResult<()> {
        self.owner.clear_many_association(&self.name)
    }

    /// Resolves the entities one at a time as the iterator advances.
    ///
    /// The references are read when the iterator is created.
    pub fn iter<'u>(&self, uow: &'u UnitOfWork) -> CoreResult<impl Iterator<Item = CoreResult<T>> + 'u>
    where
        T: 'u,
    {
        check_session(&self.owner, uow)?;
        let references = self.references()?;
        Ok(references.into_iter().map(move |reference| uow.get::<T>(&reference)))
    }
}

/// Name-to-reference mapping of `T`s.
pub struct NamedAssociation<T: Entity> {
    owner: EntityHandle,
    name: String,
    _target: PhantomData<T>,
}

impl<T: Entity> NamedAssociation<T> {
    /// Creates a view over the named association `name` of `owner`.
    pub fn of(owner: &EntityHandle, name: &str) -> CoreResult<Self> {
        check_declared(owner, name, AssociationKind::Named)?;
        Ok(Self {
            owner: owner.clone(),
            name: name.to_string(),
            _target: PhantomData,
        })
    }

    /// Returns the entries without resolving them.
    pub fn references(&self) -> CoreResult<BTreeMap<String, EntityReference>> {
        self.owner.named_association(&self.name)
    }

    /// Returns the number of entries.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.references()?.len())
    }

    /// Returns true if `name` is mapped.
    pub fn contains_name(&self, name: &str) -> CoreResult<bool> {
        Ok(self.references()?.contains_key(name))
    }

    /// Returns the mapped names in order.
    pub fn names(&self) -> CoreResult<Vec<String>> {
        Ok(self.references()?.into_keys().collect())
    }

    /// Resolves the entity mapped to `name`.
    pub fn get(&self, uow: &UnitOfWork, name: &str) -> CoreResult<Option<T>> {
        check_session(&self.owner, uow)?;
        match self.references()?.get(name) {
            Some(reference) => uow.get::<T>(reference).map(Some),
            None => Ok(None),
        }
    }

    /// Maps `name` to `entity`, returning whether an entry was overwritten.
    pub fn put(&self, name: &str, entity: &T) -> CoreResult<bool> {
        check_target(&self.owner, entity)?;
        self.owner
            .put_named_association(&self.name, name, entity.reference())
    }

    /// Removes `name`, returning whether it was mapped.
    pub fn remove(&self, name: &str) -> CoreResult<bool> {
        self.owner.remove_named_association(&self.name, name)
    }

    /// Returns the first name mapped to `entity`, by linear search.
    pub fn name_of(&self, entity: &T) -> CoreResult<Option<String>> {
        let target = entity.handle().reference();
        Ok(self
            .references()?
            .into_iter()
            .find_map(|(name, reference)| (&reference == target).then_some(name)))
    }
}
