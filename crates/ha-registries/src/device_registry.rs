//! Device Registry
//!
//! Physical devices behind config entries, keyed by their `(domain, id)`
//! identifiers. Entities point at a device through its registry id.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::DEVICE_REGISTRY_UPDATED;
use ha_core::{Context, EventData};
use ha_event_bus::EventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity_registry::RegistryAction;
use crate::storage::{Storable, Storage, StorageResult, Store};
use crate::{read, write, SAVE_DELAY};

pub const STORAGE_KEY: &str = "core.device_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// `(domain, id)` pair naming a device within an integration
pub type DeviceIdentifier = (String, String);

/// What an entity reports about the device it belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Registry id (UUID, simple form)
    pub id: String,

    pub identifiers: Vec<DeviceIdentifier>,

    /// Config entries that reported this device
    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn new(config_entry_id: &str, info: &DeviceInfo) -> Self {
        let now = Utc::now();
        let mut entry = Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            config_entries: vec![config_entry_id.to_string()],
            name: None,
            manufacturer: None,
            model: None,
            sw_version: None,
            created_at: now,
            modified_at: now,
        };
        entry.merge(config_entry_id, info);
        entry
    }

    /// Fold reported info into the entry; fields the info leaves empty keep
    /// their stored value
    fn merge(&mut self, config_entry_id: &str, info: &DeviceInfo) {
        if !self.config_entries.iter().any(|id| id == config_entry_id) {
            self.config_entries.push(config_entry_id.to_string());
        }
        for identifier in &info.identifiers {
            if !self.identifiers.contains(identifier) {
                self.identifiers.push(identifier.clone());
            }
        }
        let fields = [
            (&mut self.name, &info.name),
            (&mut self.manufacturer, &info.manufacturer),
            (&mut self.model, &info.model),
            (&mut self.sw_version, &info.sw_version),
        ];
        for (stored, reported) in fields {
            if reported.is_some() {
                stored.clone_from(reported);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Payload of `device_registry_updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistryUpdatedData {
    pub action: RegistryAction,
    pub device_id: String,
}

impl EventData for DeviceRegistryUpdatedData {
    fn event_type() -> &'static str {
        DEVICE_REGISTRY_UPDATED
    }
}

pub struct DeviceRegistry {
    store: Store<DeviceRegistryData>,
    /// id -> entry, in registration order
    devices: RwLock<IndexMap<String, Arc<DeviceEntry>>>,
    by_identifier: DashMap<DeviceIdentifier, String>,
    event_bus: Arc<EventBus>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store: Store::new(storage),
            devices: RwLock::new(IndexMap::new()),
            by_identifier: DashMap::new(),
            event_bus,
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.store.load(None).await? else {
            return Ok(());
        };

        let mut devices = write(&self.devices);
        for entry in data.devices {
            for identifier in &entry.identifiers {
                self.by_identifier.insert(identifier.clone(), entry.id.clone());
            }
            devices.insert(entry.id.clone(), Arc::new(entry));
        }
        info!("Loaded {} devices from storage", devices.len());
        Ok(())
    }

    pub async fn flush(&self) -> StorageResult<()> {
        self.store.flush().await
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        read(&self.devices).get(device_id).cloned()
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let device_id = self
            .by_identifier
            .get(&(domain.to_string(), id.to_string()))?
            .clone();
        self.get(&device_id)
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        read(&self.devices)
            .values()
            .filter(|d| d.config_entries.iter().any(|id| id == config_entry_id))
            .cloned()
            .collect()
    }

    /// Find the device matching any of the info's identifiers, or register a
    /// new one. Info without identifiers names no device.
    pub fn get_or_create(
        &self,
        config_entry_id: &str,
        info: &DeviceInfo,
    ) -> Option<Arc<DeviceEntry>> {
        if info.identifiers.is_empty() {
            return None;
        }

        let (action, entry) = {
            let mut devices = write(&self.devices);
            let existing = info
                .identifiers
                .iter()
                .find_map(|identifier| self.by_identifier.get(identifier).map(|id| id.clone()))
                .and_then(|id| devices.get(&id).cloned());

            let (action, entry) = match existing {
                Some(old) => {
                    let mut entry = (*old).clone();
                    entry.merge(config_entry_id, info);
                    if entry == *old {
                        return Some(old);
                    }
                    entry.modified_at = Utc::now();
                    (RegistryAction::Update, Arc::new(entry))
                }
                None => (
                    RegistryAction::Create,
                    Arc::new(DeviceEntry::new(config_entry_id, info)),
                ),
            };

            for identifier in &entry.identifiers {
                self.by_identifier.insert(identifier.clone(), entry.id.clone());
            }
            devices.insert(entry.id.clone(), Arc::clone(&entry));
            (action, entry)
        };

        if action == RegistryAction::Create {
            info!(device_id = %entry.id, "Registered device {}", entry.name.as_deref().unwrap_or_default());
        } else {
            debug!(device_id = %entry.id, "Updated device");
        }
        self.changed(action, &entry.id);
        Some(entry)
    }

    /// Detach a config entry from its devices. Devices left without any
    /// config entry are removed; their ids are returned.
    pub fn clear_config_entry(&self, config_entry_id: &str) -> Vec<String> {
        let mut changes = Vec::new();
        {
            let mut devices = write(&self.devices);
            let affected: Vec<Arc<DeviceEntry>> = devices
                .values()
                .filter(|d| d.config_entries.iter().any(|id| id == config_entry_id))
                .cloned()
                .collect();

            for old in affected {
                let mut entry = (*old).clone();
                entry.config_entries.retain(|id| id != config_entry_id);
                if entry.config_entries.is_empty() {
                    devices.shift_remove(&entry.id);
                    for identifier in &entry.identifiers {
                        self.by_identifier.remove(identifier);
                    }
                    changes.push((RegistryAction::Remove, entry.id));
                } else {
                    entry.modified_at = Utc::now();
                    let id = entry.id.clone();
                    devices.insert(id.clone(), Arc::new(entry));
                    changes.push((RegistryAction::Update, id));
                }
            }
        }

        let mut removed = Vec::new();
        for (action, device_id) in changes {
            self.changed(action, &device_id);
            if action == RegistryAction::Remove {
                removed.push(device_id);
            }
        }
        if !removed.is_empty() {
            info!(config_entry_id, "Removed {} devices", removed.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        read(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn changed(&self, action: RegistryAction, device_id: &str) {
        self.event_bus.fire_typed(
            DeviceRegistryUpdatedData {
                action,
                device_id: device_id.to_string(),
            },
            Context::new(),
        );
        self.store.delay_save(self.snapshot(), SAVE_DELAY);
    }

    fn snapshot(&self) -> DeviceRegistryData {
        DeviceRegistryData {
            devices: read(&self.devices).values().map(|d| (**d).clone()).collect(),
        }
    }
}
