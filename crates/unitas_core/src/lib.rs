//! # Unitas Core
//!
//! Unit-of-work entity persistence engine.
//!
//! This crate provides:
//! - Identities, references, values and entity descriptors
//! - Per-session entity state with a `NEW / LOADED / UPDATED / REMOVED`
//!   status machine
//! - The [`EntityStore`] contract with two-phase [`StateCommitter`]s and
//!   optimistic concurrency through version tokens
//! - [`UnitOfWork`] sessions with identity caching, cascading removal and
//!   completion callbacks
//! - Lazily resolved single, many and named association views
//! - In-memory, journal and preferences-tree stores
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use unitas_core::{EntityDescriptor, EntityRegistry, InMemoryEntityStore, UnitOfWorkFactory};
//!
//! let mut registry = EntityRegistry::new();
//! registry.register(EntityDescriptor::builder("Note").property("text", "").build())?;
//! let factory = UnitOfWorkFactory::new(Arc::new(InMemoryEntityStore::new()), registry);
//!
//! let uow = factory.new_unit_of_work()?;
//! let note = uow.new_entity_state(None, "Note")?;
//! note.set_property("text", "hello".to_string())?;
//! let reference = note.reference().clone();
//! uow.complete()?;
//!
//! let uow = factory.new_unit_of_work()?;
//! let text: String = uow.entity_state(&reference)?.property("text")?;
//! assert_eq!(text, "hello");
//! # Ok::<(), unitas_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod association;
mod config;
pub mod entity;
mod error;
pub mod store;
mod types;
pub mod unitofwork;

pub use association::{Association, ManyAssociation, NamedAssociation};
pub use config::Config;
pub use entity::{
    AssociationDescriptor, AssociationKind, EntityDescriptor, EntityRecord, EntityReference,
    EntityRegistry, EntityState, EntityStatus, Identity, PropertyValue, QualifiedName,
    StateOrigin, Value,
};
pub use error::{CoreError, CoreResult};
pub use store::{
    Change, EntityStates, EntityStore, EntityStoreUnitOfWork, InMemoryEntityStore,
    JournalEntityStore, JournalReport, PreferenceNode, PreferencesEntityStore, StateCommitter,
};
pub use types::{Usecase, Version};
pub use unitofwork::{
    Entity, EntityBuilder, EntityHandle, UnitOfWork, UnitOfWorkCallback, UnitOfWorkFactory,
    UnitOfWorkStack, UnitOfWorkStatus,
};
