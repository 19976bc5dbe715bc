//! Entity builders.

use super::handle::{Entity, EntityHandle};
use super::session::UnitOfWork;
use crate::entity::{AssociationKind, EntityDescriptor, EntityReference, EntityState};
use crate::error::{CoreError, CoreResult};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

/// Collects the initial state of an entity before it joins the session.
///
/// Writes go to a prototype state outside the session cache, so immutable
/// properties can be set and non-optional associations filled in before the
/// entity exists. [`new_instance`](EntityBuilder::new_instance) consumes the
/// builder; views obtained from [`instance`](EntityBuilder::instance) reject
/// writes afterwards.
pub struct EntityBuilder<'u, T: Entity> {
    uow: &'u UnitOfWork,
    prototype: EntityHandle,
    descriptor: Arc<EntityDescriptor>,
    retired: Rc<Cell<bool>>,
    _entity: PhantomData<T>,
}

impl<'u, T: Entity> EntityBuilder<'u, T> {
    pub(crate) fn new(
        uow: &'u UnitOfWork,
        reference: EntityReference,
        descriptor: Arc<EntityDescriptor>,
    ) -> CoreResult<Self> {
        let mut state = EntityState::prototype(reference, descriptor.type_name(), uow.current_time());
        for property in descriptor.properties() {
            state.set_property(property.name().clone(), property.default_value().clone())?;
        }
        let retired = Rc::new(Cell::new(false));
        let prototype = EntityHandle::prototype(
            Rc::new(RefCell::new(state)),
            Arc::clone(&descriptor),
            uow.session().clone(),
            Rc::clone(&retired),
        );
        Ok(Self {
            uow,
            prototype,
            descriptor,
            retired,
            _entity: PhantomData,
        })
    }

    /// Returns the reference the entity will get.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        self.prototype.reference()
    }

    /// Returns a typed view over the prototype for setting initial values.
    #[must_use]
    pub fn instance(&self) -> T {
        T::from_handle(self.prototype.clone())
    }

    /// Creates the entity in the session from the prototype.
    ///
    /// Fails if a non-optional single association is unset or the identity is
    /// already live in the session.
    pub fn new_instance(self) -> CoreResult<T> {
        self.uow.session().check_active()?;
        let reference = self.prototype.reference().clone();
        self.uow.ensure_identity_free(&reference)?;

        let prototype = self.prototype.state_ref().borrow();
        for association in self.descriptor.associations() {
            if association.kind() == AssociationKind::Single
                && !association.is_optional()
                && prototype.association(association.name()).is_none()
            {
                return Err(CoreError::invalid_operation(format!(
                    "association {} is not optional",
                    association.name()
                )));
            }
        }

        let mut state = self.uow.store_new_state(reference, &self.descriptor)?;
        state.copy_contents_from(&prototype);
        drop(prototype);
        self.retired.set(true);

        let handle = self.uow.cache_new(state, Arc::clone(&self.descriptor));
        Ok(T::from_handle(handle))
    }
}
