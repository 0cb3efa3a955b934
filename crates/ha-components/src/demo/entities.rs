//! Entities of a demo device
//!
//! Read-only entities come from the description tables; the switch,
//! number and button are written out because they call the client.

use async_trait::async_trait;
use ha_core::HomeAssistantError;
use ha_entity::{
    binary_sensors, sensors, BinarySensorDescription, ButtonEntity, CoordinatorEntity, DeviceInfo,
    Entity, EntityIdentity, NumberEntity, PlatformEntity, SensorDescription, Subscription,
    SwitchEntity, UpdateCallback,
};
use serde_json::json;
use std::sync::Arc;

use super::client::{DeviceClient, DeviceDetails, DeviceStatus};
use super::coordinator::{DemoCoordinator, DemoSource};
use super::DOMAIN;

/// Target bounds used until the device has reported its own
pub const MIN_TARGET_TEMPERATURE: f64 = 5.0;
pub const MAX_TARGET_TEMPERATURE: f64 = 30.0;

pub static SENSORS: [SensorDescription<DeviceStatus>; 2] = [
    SensorDescription {
        key: "battery",
        name: "Battery",
        unit: Some("%"),
        device_class: Some("battery"),
        state_class: Some("measurement"),
        value_fn: |status| status.battery.map(|level| json!(level)),
    },
    SensorDescription {
        key: "temperature",
        name: "Temperature",
        unit: Some("°C"),
        device_class: Some("temperature"),
        state_class: Some("measurement"),
        value_fn: |status| status.temperature.map(|t| json!(t)),
    },
];

pub static BINARY_SENSORS: [BinarySensorDescription<DeviceStatus>; 1] =
    [BinarySensorDescription {
        key: "charging",
        name: "Charging",
        device_class: Some("battery_charging"),
        is_on_fn: |status| status.charging,
    }];

/// Identity shared by all entities of the device
pub fn device_identity(title: &str, details: &DeviceDetails) -> EntityIdentity {
    EntityIdentity {
        unique_prefix: details.serial.clone(),
        device: DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), details.serial.clone())],
            name: Some(title.to_string()),
            manufacturer: Some("Demo".to_string()),
            model: Some(details.model.clone()),
            sw_version: Some(details.firmware.clone()),
        },
    }
}

/// Every entity of one device
pub fn build_entities(
    coordinator: &DemoCoordinator,
    identity: &EntityIdentity,
) -> Vec<PlatformEntity> {
    let mut entities = sensors(coordinator, &SENSORS, identity);
    entities.extend(binary_sensors(coordinator, &BINARY_SENSORS, identity));

    let base = || DeviceEntity {
        base: CoordinatorEntity::new(coordinator.clone()),
        identity: identity.clone(),
    };
    entities.push(PlatformEntity::Switch(Arc::new(PowerSwitch(base()))));
    entities.push(PlatformEntity::Number(Arc::new(TargetTemperature(base()))));
    entities.push(PlatformEntity::Button(Arc::new(IdentifyButton(base()))));
    entities
}

/// Coordinator binding plus device identity
struct DeviceEntity {
    base: CoordinatorEntity<DemoSource>,
    identity: EntityIdentity,
}

impl DeviceEntity {
    fn client(&self) -> &Arc<dyn DeviceClient> {
        self.base.coordinator().source().client()
    }

    /// Fetch the new state right after a command
    async fn refresh_after_command(&self) {
        self.base.coordinator().request_refresh().await;
    }
}

macro_rules! device_entity {
    ($ty:ident, $key:literal, $name:literal) => {
        impl Entity for $ty {
            fn unique_id(&self) -> Option<String> {
                Some(self.0.identity.unique_id($key))
            }

            fn name(&self) -> Option<String> {
                Some($name.to_string())
            }

            fn device_info(&self) -> Option<DeviceInfo> {
                Some(self.0.identity.device.clone())
            }

            fn available(&self) -> bool {
                self.0.base.available()
            }

            fn subscribe(&self, on_update: UpdateCallback) -> Option<Subscription> {
                Some(self.0.base.subscribe(on_update))
            }
        }
    };
}

struct PowerSwitch(DeviceEntity);
device_entity!(PowerSwitch, "power", "Power");

impl PowerSwitch {
    async fn set_power(&self, on: bool) -> Result<(), HomeAssistantError> {
        self.0.client().set_power(on).await?;
        self.0.refresh_after_command().await;
        Ok(())
    }
}

#[async_trait]
impl SwitchEntity for PowerSwitch {
    fn is_on(&self) -> Option<bool> {
        self.0.base.read(|status| Some(status.power))
    }

    async fn turn_on(&self) -> Result<(), HomeAssistantError> {
        self.set_power(true).await
    }

    async fn turn_off(&self) -> Result<(), HomeAssistantError> {
        self.set_power(false).await
    }
}

struct TargetTemperature(DeviceEntity);
device_entity!(TargetTemperature, "target_temperature", "Target temperature");

#[async_trait]
impl NumberEntity for TargetTemperature {
    fn native_value(&self) -> Option<f64> {
        self.0.base.read(|status| Some(status.target_temperature))
    }

    fn native_min_value(&self) -> f64 {
        self.0
            .base
            .read(|status| Some(status.min_temperature))
            .unwrap_or(MIN_TARGET_TEMPERATURE)
    }

    fn native_max_value(&self) -> f64 {
        self.0
            .base
            .read(|status| Some(status.max_temperature))
            .unwrap_or(MAX_TARGET_TEMPERATURE)
    }

    fn native_step(&self) -> f64 {
        0.5
    }

    fn unit_of_measurement(&self) -> Option<String> {
        Some("°C".to_string())
    }

    async fn set_native_value(&self, value: f64) -> Result<(), HomeAssistantError> {
        self.0.client().set_target_temperature(value).await?;
        self.0.refresh_after_command().await;
        Ok(())
    }
}

struct IdentifyButton(DeviceEntity);
device_entity!(IdentifyButton, "identify", "Identify");

#[async_trait]
impl ButtonEntity for IdentifyButton {
    async fn press(&self) -> Result<(), HomeAssistantError> {
        Ok(self.0.client().identify().await?)
    }
}
