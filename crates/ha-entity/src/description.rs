//! Declarative entity descriptions
//!
//! Integrations list their read-only entities as static tables: one row
//! per field of the coordinator snapshot, each with an accessor. The
//! generic entities here turn a row plus a coordinator into a live entity.

use ha_coordinator::{DataSource, DataUpdateCoordinator};
use serde_json::Value;
use std::sync::Arc;

use crate::coordinator_entity::CoordinatorEntity;
use crate::entity::{
    BinarySensorEntity, DeviceInfo, Entity, PlatformEntity, SensorEntity, Subscription,
    UpdateCallback,
};

pub struct SensorDescription<D> {
    /// Suffix of the unique id, unique within the integration
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub value_fn: fn(&D) -> Option<Value>,
}

pub struct BinarySensorDescription<D> {
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: Option<&'static str>,
    pub is_on_fn: fn(&D) -> Option<bool>,
}

/// Identity shared by every entity of one device
#[derive(Debug, Clone)]
pub struct EntityIdentity {
    /// Prefix for unique ids, usually the device serial
    pub unique_prefix: String,
    pub device: DeviceInfo,
}

impl EntityIdentity {
    pub fn unique_id(&self, key: &str) -> String {
        format!("{}_{}", self.unique_prefix, key)
    }
}

/// Sensor rendering one snapshot field.
///
/// Unavailable when the last refresh failed or the field is missing.
pub struct DescribedSensor<S: DataSource> {
    base: CoordinatorEntity<S>,
    description: &'static SensorDescription<S::Data>,
    identity: EntityIdentity,
}

impl<S: DataSource> DescribedSensor<S> {
    pub fn new(
        coordinator: DataUpdateCoordinator<S>,
        description: &'static SensorDescription<S::Data>,
        identity: EntityIdentity,
    ) -> Self {
        Self {
            base: CoordinatorEntity::new(coordinator),
            description,
            identity,
        }
    }
}

impl<S: DataSource> Entity for DescribedSensor<S> {
    fn unique_id(&self) -> Option<String> {
        Some(self.identity.unique_id(self.description.key))
    }

    fn name(&self) -> Option<String> {
        Some(self.description.name.to_string())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.identity.device.clone())
    }

    fn available(&self) -> bool {
        self.base.available() && self.native_value().is_some()
    }

    fn subscribe(&self, on_update: UpdateCallback) -> Option<Subscription> {
        Some(self.base.subscribe(on_update))
    }
}

impl<S: DataSource> SensorEntity for DescribedSensor<S> {
    fn native_value(&self) -> Option<Value> {
        self.base.read(self.description.value_fn)
    }

    fn unit_of_measurement(&self) -> Option<String> {
        self.description.unit.map(str::to_string)
    }

    fn device_class(&self) -> Option<String> {
        self.description.device_class.map(str::to_string)
    }

    fn state_class(&self) -> Option<String> {
        self.description.state_class.map(str::to_string)
    }
}

pub struct DescribedBinarySensor<S: DataSource> {
    base: CoordinatorEntity<S>,
    description: &'static BinarySensorDescription<S::Data>,
    identity: EntityIdentity,
}

impl<S: DataSource> DescribedBinarySensor<S> {
    pub fn new(
        coordinator: DataUpdateCoordinator<S>,
        description: &'static BinarySensorDescription<S::Data>,
        identity: EntityIdentity,
    ) -> Self {
        Self {
            base: CoordinatorEntity::new(coordinator),
            description,
            identity,
        }
    }
}

impl<S: DataSource> Entity for DescribedBinarySensor<S> {
    fn unique_id(&self) -> Option<String> {
        Some(self.identity.unique_id(self.description.key))
    }

    fn name(&self) -> Option<String> {
        Some(self.description.name.to_string())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.identity.device.clone())
    }

    fn available(&self) -> bool {
        self.base.available() && self.is_on().is_some()
    }

    fn subscribe(&self, on_update: UpdateCallback) -> Option<Subscription> {
        Some(self.base.subscribe(on_update))
    }
}

impl<S: DataSource> BinarySensorEntity for DescribedBinarySensor<S> {
    fn is_on(&self) -> Option<bool> {
        self.base.read(self.description.is_on_fn)
    }

    fn device_class(&self) -> Option<String> {
        self.description.device_class.map(str::to_string)
    }
}

/// Build one sensor per description row
pub fn sensors<S: DataSource>(
    coordinator: &DataUpdateCoordinator<S>,
    descriptions: &'static [SensorDescription<S::Data>],
    identity: &EntityIdentity,
) -> Vec<PlatformEntity> {
    descriptions
        .iter()
        .map(|description| {
            PlatformEntity::Sensor(Arc::new(DescribedSensor::new(
                coordinator.clone(),
                description,
                identity.clone(),
            )))
        })
        .collect()
}

/// Build one binary sensor per description row
pub fn binary_sensors<S: DataSource>(
    coordinator: &DataUpdateCoordinator<S>,
    descriptions: &'static [BinarySensorDescription<S::Data>],
    identity: &EntityIdentity,
) -> Vec<PlatformEntity> {
    descriptions
        .iter()
        .map(|description| {
            PlatformEntity::BinarySensor(Arc::new(DescribedBinarySensor::new(
                coordinator.clone(),
                description,
                identity.clone(),
            )))
        })
        .collect()
}
