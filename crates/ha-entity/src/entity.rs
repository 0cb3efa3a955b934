//! Entity contracts
//!
//! [`Entity`] covers identity and lifecycle. Each platform trait adds the
//! rendering and action contract of one entity kind. [`PlatformEntity`]
//! erases the platform so the host can hold every entity of an entry in
//! one collection.

use async_trait::async_trait;
use ha_core::{HomeAssistantError, Platform, STATE_OFF, STATE_ON, STATE_UNKNOWN};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub use ha_registries::DeviceInfo;

pub type Attributes = HashMap<String, Value>;

/// Run by the data provider whenever the entity should re-render
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Keeps an entity subscribed to its data provider; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Identity and lifecycle of a published entity
pub trait Entity: Send + Sync {
    /// Stable id, unique within the integration
    fn unique_id(&self) -> Option<String>;

    /// Entity name; combined with the device name for display
    fn name(&self) -> Option<String>;

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    fn extra_attributes(&self) -> Attributes {
        Attributes::new()
    }

    /// Register `on_update` with whatever feeds this entity. Entities that
    /// never change return `None`.
    fn subscribe(&self, _on_update: UpdateCallback) -> Option<Subscription> {
        None
    }

    fn added_to_hass(&self) {}

    fn will_remove_from_hass(&self) {}
}

pub trait SensorEntity: Entity {
    fn native_value(&self) -> Option<Value>;

    fn unit_of_measurement(&self) -> Option<String> {
        None
    }

    fn device_class(&self) -> Option<String> {
        None
    }

    fn state_class(&self) -> Option<String> {
        None
    }
}

pub trait BinarySensorEntity: Entity {
    fn is_on(&self) -> Option<bool>;

    fn device_class(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait SwitchEntity: Entity {
    fn is_on(&self) -> Option<bool>;

    async fn turn_on(&self) -> Result<(), HomeAssistantError>;

    async fn turn_off(&self) -> Result<(), HomeAssistantError>;
}

#[async_trait]
pub trait NumberEntity: Entity {
    fn native_value(&self) -> Option<f64>;

    fn native_min_value(&self) -> f64 {
        0.0
    }

    fn native_max_value(&self) -> f64 {
        100.0
    }

    fn native_step(&self) -> f64 {
        1.0
    }

    fn unit_of_measurement(&self) -> Option<String> {
        None
    }

    /// Only called with values inside `[native_min_value, native_max_value]`
    async fn set_native_value(&self, value: f64) -> Result<(), HomeAssistantError>;
}

#[async_trait]
pub trait ButtonEntity: Entity {
    async fn press(&self) -> Result<(), HomeAssistantError>;
}

/// Something a caller asks an entity to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityAction {
    TurnOn,
    TurnOff,
    SetValue(f64),
    Press,
}

impl EntityAction {
    pub fn name(&self) -> &'static str {
        match self {
            EntityAction::TurnOn => "turn_on",
            EntityAction::TurnOff => "turn_off",
            EntityAction::SetValue(_) => "set_value",
            EntityAction::Press => "press",
        }
    }
}

/// What an entity currently renders
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Rendered value, `unknown` when the entity has none
    pub value: String,
    pub attributes: Attributes,
    pub available: bool,
}

#[derive(Clone)]
pub enum PlatformEntity {
    Sensor(Arc<dyn SensorEntity>),
    BinarySensor(Arc<dyn BinarySensorEntity>),
    Switch(Arc<dyn SwitchEntity>),
    Number(Arc<dyn NumberEntity>),
    Button(Arc<dyn ButtonEntity>),
}

macro_rules! with_entity {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            PlatformEntity::Sensor($e) => $body,
            PlatformEntity::BinarySensor($e) => $body,
            PlatformEntity::Switch($e) => $body,
            PlatformEntity::Number($e) => $body,
            PlatformEntity::Button($e) => $body,
        }
    };
}

impl PlatformEntity {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformEntity::Sensor(_) => Platform::Sensor,
            PlatformEntity::BinarySensor(_) => Platform::BinarySensor,
            PlatformEntity::Switch(_) => Platform::Switch,
            PlatformEntity::Number(_) => Platform::Number,
            PlatformEntity::Button(_) => Platform::Button,
        }
    }

    pub fn unique_id(&self) -> Option<String> {
        with_entity!(self, e => e.unique_id())
    }

    pub fn available(&self) -> bool {
        with_entity!(self, e => e.available())
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        with_entity!(self, e => e.device_info())
    }

    pub fn subscribe(&self, on_update: UpdateCallback) -> Option<Subscription> {
        with_entity!(self, e => e.subscribe(on_update))
    }

    pub fn added_to_hass(&self) {
        with_entity!(self, e => e.added_to_hass())
    }

    pub fn will_remove_from_hass(&self) {
        with_entity!(self, e => e.will_remove_from_hass())
    }

    /// Display name: device name and entity name joined, either alone if
    /// the other is missing
    pub fn friendly_name(&self) -> Option<String> {
        let device = self.device_info().and_then(|d| d.name);
        let name = with_entity!(self, e => e.name());
        match (device, name) {
            (Some(device), Some(name)) => Some(format!("{} {}", device, name)),
            (device, name) => name.or(device),
        }
    }

    /// Render value and attributes. Unavailable entities keep their
    /// descriptive attributes but drop value-dependent ones.
    pub fn render(&self) -> EntityState {
        let available = self.available();
        let mut attributes = Attributes::new();
        if let Some(name) = self.friendly_name() {
            attributes.insert("friendly_name".into(), json!(name));
        }

        let value = match self {
            PlatformEntity::Sensor(e) => {
                insert_opt(&mut attributes, "unit_of_measurement", e.unit_of_measurement());
                insert_opt(&mut attributes, "device_class", e.device_class());
                insert_opt(&mut attributes, "state_class", e.state_class());
                e.native_value().map(render_value)
            }
            PlatformEntity::BinarySensor(e) => {
                insert_opt(&mut attributes, "device_class", e.device_class());
                e.is_on().map(render_on_off)
            }
            PlatformEntity::Switch(e) => e.is_on().map(render_on_off),
            PlatformEntity::Number(e) => {
                attributes.insert("min".into(), json!(e.native_min_value()));
                attributes.insert("max".into(), json!(e.native_max_value()));
                attributes.insert("step".into(), json!(e.native_step()));
                insert_opt(&mut attributes, "unit_of_measurement", e.unit_of_measurement());
                e.native_value().map(|v| v.to_string())
            }
            PlatformEntity::Button(_) => None,
        };

        if available {
            attributes.extend(with_entity!(self, e => e.extra_attributes()));
        }

        EntityState {
            value: value.unwrap_or_else(|| STATE_UNKNOWN.to_string()),
            attributes,
            available,
        }
    }

    /// Perform `action`. Number values are checked against the entity's
    /// bounds before the entity sees them.
    pub async fn call(
        &self,
        entity_id: &str,
        action: EntityAction,
    ) -> Result<(), HomeAssistantError> {
        match (self, action) {
            (PlatformEntity::Switch(e), EntityAction::TurnOn) => e.turn_on().await,
            (PlatformEntity::Switch(e), EntityAction::TurnOff) => e.turn_off().await,
            (PlatformEntity::Number(e), EntityAction::SetValue(value)) => {
                let (min, max) = (e.native_min_value(), e.native_max_value());
                if !(min..=max).contains(&value) {
                    return Err(HomeAssistantError::OutOfRange {
                        entity_id: entity_id.to_string(),
                        value,
                        min,
                        max,
                    });
                }
                e.set_native_value(value).await
            }
            (PlatformEntity::Button(e), EntityAction::Press) => e.press().await,
            (_, action) => Err(HomeAssistantError::NotSupported {
                entity_id: entity_id.to_string(),
                action: action.name().to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for PlatformEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformEntity")
            .field("platform", &self.platform())
            .field("unique_id", &self.unique_id())
            .finish()
    }
}

fn insert_opt(attributes: &mut Attributes, key: &str, value: Option<String>) {
    if let Some(value) = value {
        attributes.insert(key.to_string(), Value::String(value));
    }
}

fn render_on_off(on: bool) -> String {
    let state = if on { STATE_ON } else { STATE_OFF };
    state.to_string()
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(b) => render_on_off(b),
        other => other.to_string(),
    }
}
