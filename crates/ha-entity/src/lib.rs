//! Entities published by integrations
//!
//! Entities are composed from three independent parts: [`Entity`] for
//! identity and lifecycle, [`CoordinatorEntity`] for subscription to a
//! coordinator, and one platform trait ([`SensorEntity`], [`SwitchEntity`],
//! ...) for rendering and actions. [`EntityPlatform`] connects the entities
//! of a config entry to the state machine.

mod coordinator_entity;
mod description;
mod entity;
mod platform;

pub use coordinator_entity::CoordinatorEntity;
pub use description::{
    binary_sensors, sensors, BinarySensorDescription, DescribedBinarySensor, DescribedSensor,
    EntityIdentity, SensorDescription,
};
pub use entity::{
    Attributes, BinarySensorEntity, ButtonEntity, DeviceInfo, Entity, EntityAction, EntityState,
    NumberEntity, PlatformEntity, SensorEntity, Subscription, SwitchEntity, UpdateCallback,
};
pub use platform::EntityPlatform;
