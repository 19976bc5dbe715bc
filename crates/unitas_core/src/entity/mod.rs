//! Entity identities, values, descriptors and per-session state.

mod descriptor;
mod identity;
mod state;
mod value;

pub use descriptor::{
    AssociationDescriptor, AssociationKind, EntityDescriptor, EntityDescriptorBuilder,
    EntityRegistry, PropertyDescriptor,
};
pub use identity::{EntityReference, Identity};
pub use state::{EntityRecord, EntityState, EntityStatus, StateOrigin};
pub use value::{PropertyValue, QualifiedName, Value};
