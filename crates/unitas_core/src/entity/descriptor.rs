//! Descriptor tables for entity types.
//!
//! A descriptor lists the properties and associations an entity type declares.
//! Typed views validate every accessor against it, and the unit of work reads
//! the `aggregated` flags when cascading removals.

use super::value::{QualifiedName, Value};
use crate::error::{CoreError, CoreResult};
use crate::unitofwork::Entity;
use std::collections::HashMap;
use std::sync::Arc;

/// A declared property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    name: QualifiedName,
    default: Value,
    immutable: bool,
}

impl PropertyDescriptor {
    /// Returns the qualified property name.
    #[must_use]
    pub const fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// Returns the value new entities start with.
    #[must_use]
    pub const fn default_value(&self) -> &Value {
        &self.default
    }

    /// Returns true if the property can only be set while building.
    #[must_use]
    pub const fn is_immutable(&self) -> bool {
        self.immutable
    }
}

/// Kind of association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// Zero or one reference.
    Single,
    /// Ordered sequence of references.
    Many,
    /// Name to reference mapping.
    Named,
}

/// A declared association of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    name: QualifiedName,
    kind: AssociationKind,
    target_type: String,
    aggregated: bool,
    optional: bool,
    unique: bool,
}

impl AssociationDescriptor {
    fn with_kind(name: &str, kind: AssociationKind, target_type: &str) -> Self {
        Self {
            name: QualifiedName::new("", name),
            kind,
            target_type: target_type.to_string(),
            aggregated: false,
            optional: false,
            unique: false,
        }
    }

    /// Declares a single association.
    #[must_use]
    pub fn single(name: &str, target_type: &str) -> Self {
        Self::with_kind(name, AssociationKind::Single, target_type)
    }

    /// Declares a many-association.
    #[must_use]
    pub fn many(name: &str, target_type: &str) -> Self {
        Self::with_kind(name, AssociationKind::Many, target_type)
    }

    /// Declares a named association.
    #[must_use]
    pub fn named(name: &str, target_type: &str) -> Self {
        Self::with_kind(name, AssociationKind::Named, target_type)
    }

    /// Marks the targets as owned by the referencing entity.
    #[must_use]
    pub const fn aggregated(mut self) -> Self {
        self.aggregated = true;
        self
    }

    /// Allows a single association to be empty.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Forbids duplicate references in a many-association.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Returns the qualified association name.
    #[must_use]
    pub const fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// Returns the association kind.
    #[must_use]
    pub const fn kind(&self) -> AssociationKind {
        self.kind
    }

    /// Returns the type name of referenced entities.
    #[must_use]
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Returns true if targets are removed with the owner.
    #[must_use]
    pub const fn is_aggregated(&self) -> bool {
        self.aggregated
    }

    /// Returns true if an empty single association is allowed.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Returns true if duplicate references are forbidden.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }
}

/// Declared shape of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    type_name: String,
    properties: Vec<PropertyDescriptor>,
    associations: Vec<AssociationDescriptor>,
}

impl EntityDescriptor {
    /// Starts a descriptor for `type_name`.
    #[must_use]
    pub fn builder(type_name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: Self {
                type_name: type_name.into(),
                properties: Vec::new(),
                associations: Vec::new(),
            },
        }
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns all declared properties.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Returns all declared associations.
    #[must_use]
    pub fn associations(&self) -> &[AssociationDescriptor] {
        &self.associations
    }

    /// Looks up a property by simple name.
    pub fn property(&self, name: &str) -> CoreResult<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name.name() == name)
            .ok_or_else(|| self.no_such_state(name))
    }

    /// Looks up an association of the given kind by simple name.
    pub fn association(&self, name: &str, kind: AssociationKind) -> CoreResult<&AssociationDescriptor> {
        self.associations
            .iter()
            .find(|a| a.kind == kind && a.name.name() == name)
            .ok_or_else(|| self.no_such_state(name))
    }

    /// Iterates over aggregated associations of every kind.
    pub fn aggregated_associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.associations.iter().filter(|a| a.aggregated)
    }

    /// Checks that every declared name survives the `Type:name` encoding
    /// stores use.
    fn validate(&self) -> CoreResult<()> {
        if self.type_name.is_empty() {
            return Err(CoreError::invalid_operation("entity type name is empty"));
        }
        let names = self
            .properties
            .iter()
            .map(|p| &p.name)
            .chain(self.associations.iter().map(|a| &a.name));
        for name in names {
            if name.name().is_empty() || name.name().contains(':') {
                return Err(CoreError::invalid_operation(format!(
                    "entity type {} declares invalid name {:?}: names must be non-empty and must not contain ':'",
                    self.type_name,
                    name.name()
                )));
            }
        }
        Ok(())
    }

    fn no_such_state(&self, name: &str) -> CoreError {
        CoreError::NoSuchState {
            entity_type: self.type_name.clone(),
            name: name.to_string(),
        }
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Declares a mutable property.
    #[must_use]
    pub fn property(self, name: &str, default: impl Into<Value>) -> Self {
        self.push_property(name, default.into(), false)
    }

    /// Declares a property that can only be set while building.
    #[must_use]
    pub fn immutable_property(self, name: &str, default: impl Into<Value>) -> Self {
        self.push_property(name, default.into(), true)
    }

    fn push_property(mut self, name: &str, default: Value, immutable: bool) -> Self {
        let name = QualifiedName::new(self.descriptor.type_name.clone(), name);
        self.descriptor.properties.push(PropertyDescriptor {
            name,
            default,
            immutable,
        });
        self
    }

    /// Declares an association.
    #[must_use]
    pub fn association(mut self, mut association: AssociationDescriptor) -> Self {
        association.name = QualifiedName::new(
            self.descriptor.type_name.clone(),
            association.name.name().to_string(),
        );
        self.descriptor.associations.push(association);
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}

/// Registry of the entity types visible to sessions.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    types: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. Fails if the type name is already taken.
    ///
    /// Fails if the type is already registered, or if a property or
    /// association name is empty or contains `:`.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> CoreResult<Arc<EntityDescriptor>> {
        descriptor.validate()?;
        if self.types.contains_key(descriptor.type_name()) {
            return Err(CoreError::invalid_operation(format!(
                "entity type {} is already registered",
                descriptor.type_name()
            )));
        }
        let descriptor = Arc::new(descriptor);
        self.types
            .insert(descriptor.type_name().to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Registers the descriptor of a typed entity view.
    pub fn register_entity<T: Entity>(&mut self) -> CoreResult<Arc<EntityDescriptor>> {
        let descriptor = T::descriptor();
        if descriptor.type_name() != T::TYPE_NAME {
            return Err(CoreError::invalid_operation(format!(
                "descriptor names type {} but the view declares {}",
                descriptor.type_name(),
                T::TYPE_NAME
            )));
        }
        self.register(descriptor)
    }

    /// Registers a descriptor and returns the registry, for chained setup.
    pub fn with(mut self, descriptor: EntityDescriptor) -> CoreResult<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Looks up a descriptor by type name.
    pub fn get(&self, type_name: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| CoreError::no_such_entity_type(type_name))
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
