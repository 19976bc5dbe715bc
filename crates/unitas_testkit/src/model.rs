//! Entity types shared by the test suites.
//!
//! - [`Thing`]: every property kind plus one association of each kind
//! - [`Assembly`] and [`Part`]: an aggregate for cascading removal

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use unitas_core::{
    Association, AssociationDescriptor, CoreResult, Entity, EntityDescriptor, EntityHandle,
    EntityRegistry, ManyAssociation, NamedAssociation, Value,
};

/// Registry holding every model type.
pub fn registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry
        .register_entity::<Thing>()
        .expect("Failed to register Thing");
    registry
        .register_entity::<Assembly>()
        .expect("Failed to register Assembly");
    registry
        .register_entity::<Part>()
        .expect("Failed to register Part");
    registry
}

/// General-purpose entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Thing(EntityHandle);

impl Entity for Thing {
    const TYPE_NAME: &'static str = "Thing";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder(Self::TYPE_NAME)
            .property("name", "")
            .property("count", 0i64)
            .property("active", false)
            .property("created", Value::Null)
            .property("tags", Value::List(Vec::new()))
            .property("attributes", Value::Map(BTreeMap::new()))
            .immutable_property("serial", Value::Null)
            .association(AssociationDescriptor::single("partner", Self::TYPE_NAME).optional())
            .association(AssociationDescriptor::many("friends", Self::TYPE_NAME))
            .association(AssociationDescriptor::named("labeled", Self::TYPE_NAME))
            .build()
    }

    fn from_handle(handle: EntityHandle) -> Self {
        Self(handle)
    }

    fn handle(&self) -> &EntityHandle {
        &self.0
    }
}

impl Thing {
    /// Name.
    pub fn name(&self) -> CoreResult<String> {
        self.0.property("name")
    }

    /// Sets the name.
    pub fn set_name(&self, name: &str) -> CoreResult<()> {
        self.0.set_property("name", name.to_string())
    }

    /// Counter.
    pub fn count(&self) -> CoreResult<i64> {
        self.0.property("count")
    }

    /// Sets the counter.
    pub fn set_count(&self, count: i64) -> CoreResult<()> {
        self.0.set_property("count", count)
    }

    /// Flag.
    pub fn active(&self) -> CoreResult<bool> {
        self.0.property("active")
    }

    /// Sets the flag.
    pub fn set_active(&self, active: bool) -> CoreResult<()> {
        self.0.set_property("active", active)
    }

    /// Creation time, if set.
    pub fn created(&self) -> CoreResult<Option<DateTime<Utc>>> {
        self.0.property("created")
    }

    /// Sets the creation time.
    pub fn set_created(&self, created: Option<DateTime<Utc>>) -> CoreResult<()> {
        self.0.set_property("created", created)
    }

    /// Raw value of any property.
    pub fn value(&self, name: &str) -> CoreResult<Value> {
        self.0.property(name)
    }

    /// Sets a raw property value.
    pub fn set_value(&self, name: &str, value: Value) -> CoreResult<()> {
        self.0.set_property_value(name, value)
    }

    /// Serial number, settable only while building.
    pub fn serial(&self) -> CoreResult<Option<String>> {
        self.0.property("serial")
    }

    /// Sets the serial number.
    pub fn set_serial(&self, serial: &str) -> CoreResult<()> {
        self.0.set_property("serial", Some(serial.to_string()))
    }

    /// Single association to another thing.
    pub fn partner(&self) -> Association<Thing> {
        Association::of(&self.0, "partner").expect("declared association")
    }

    /// Ordered association to other things.
    pub fn friends(&self) -> ManyAssociation<Thing> {
        ManyAssociation::of(&self.0, "friends").expect("declared association")
    }

    /// Named association to other things.
    pub fn labeled(&self) -> NamedAssociation<Thing> {
        NamedAssociation::of(&self.0, "labeled").expect("declared association")
    }
}

/// Aggregate root owning its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly(EntityHandle);

impl Entity for Assembly {
    const TYPE_NAME: &'static str = "Assembly";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder(Self::TYPE_NAME)
            .property("name", "")
            .association(AssociationDescriptor::single("frame", Part::TYPE_NAME).optional().aggregated())
            .association(AssociationDescriptor::many("parts", Part::TYPE_NAME).aggregated())
            .association(AssociationDescriptor::named("spares", Part::TYPE_NAME).aggregated())
            .association(AssociationDescriptor::single("supplier", Part::TYPE_NAME).optional())
            .build()
    }

    fn from_handle(handle: EntityHandle) -> Self {
        Self(handle)
    }

    fn handle(&self) -> &EntityHandle {
        &self.0
    }
}

impl Assembly {
    /// Owned frame.
    pub fn frame(&self) -> Association<Part> {
        Association::of(&self.0, "frame").expect("declared association")
    }

    /// Owned parts.
    pub fn parts(&self) -> ManyAssociation<Part> {
        ManyAssociation::of(&self.0, "parts").expect("declared association")
    }

    /// Owned spares by slot.
    pub fn spares(&self) -> NamedAssociation<Part> {
        NamedAssociation::of(&self.0, "spares").expect("declared association")
    }

    /// Part referenced but not owned.
    pub fn supplier(&self) -> Association<Part> {
        Association::of(&self.0, "supplier").expect("declared association")
    }
}

/// Part of an assembly; may own sub-parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Part(EntityHandle);

impl Entity for Part {
    const TYPE_NAME: &'static str = "Part";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder(Self::TYPE_NAME)
            .property("label", "")
            .association(AssociationDescriptor::many("subparts", Self::TYPE_NAME).aggregated())
            .build()
    }

    fn from_handle(handle: EntityHandle) -> Self {
        Self(handle)
    }

    fn handle(&self) -> &EntityHandle {
        &self.0
    }
}

impl Part {
    /// Label.
    pub fn label(&self) -> CoreResult<String> {
        self.0.property("label")
    }

    /// Sets the label.
    pub fn set_label(&self, label: &str) -> CoreResult<()> {
        self.0.set_property("label", label.to_string())
    }

    /// Owned sub-parts.
    pub fn subparts(&self) -> ManyAssociation<Part> {
        ManyAssociation::of(&self.0, "subparts").expect("declared association")
    }
}
