//! Entity Registry
//!
//! Remembers the entity id handed to every entity that has a unique id, so
//! the id survives restarts, reloads and renamed config entries. Entries are
//! keyed by `(domain, platform, unique_id)`.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::ENTITY_REGISTRY_UPDATED;
use ha_core::{Context, EntityId, EntityIdError, EventData};
use ha_event_bus::EventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ulid::Ulid;

use crate::storage::{Storable, Storage, StorageResult, Store};
use crate::{read, write, SAVE_DELAY};

pub const STORAGE_KEY: &str = "core.entity_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryAction {
    Create,
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Registry id (lowercase ULID)
    pub id: String,

    pub entity_id: EntityId,

    pub unique_id: String,

    /// Integration that created the entity
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Name the entity reported when last registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    fn key(&self) -> RegistryKey {
        (
            self.entity_id.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// `(domain, platform, unique_id)`
type RegistryKey = (String, String, String);

/// An entity asking for its id
#[derive(Debug, Clone, Copy)]
pub struct EntityRegistration<'a> {
    /// Entity domain, e.g. `sensor`
    pub domain: &'a str,
    pub platform: &'a str,
    pub unique_id: &'a str,
    /// Object id source for a new entry, slugified
    pub suggested_name: &'a str,
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub original_name: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Payload of `entity_registry_updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRegistryUpdatedData {
    pub action: RegistryAction,
    pub entity_id: String,
}

impl EventData for EntityRegistryUpdatedData {
    fn event_type() -> &'static str {
        ENTITY_REGISTRY_UPDATED
    }
}

pub struct EntityRegistry {
    store: Store<EntityRegistryData>,
    /// entity_id -> entry, in registration order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,
    by_key: DashMap<RegistryKey, String>,
    event_bus: Arc<EventBus>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store: Store::new(storage),
            by_entity_id: RwLock::new(IndexMap::new()),
            by_key: DashMap::new(),
            event_bus,
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.store.load(None).await? else {
            return Ok(());
        };

        let mut entities = write(&self.by_entity_id);
        for entry in data.entities {
            let entity_id = entry.entity_id.to_string();
            self.by_key.insert(entry.key(), entity_id.clone());
            entities.insert(entity_id, Arc::new(entry));
        }
        info!("Loaded {} entities from storage", entities.len());
        Ok(())
    }

    pub async fn flush(&self) -> StorageResult<()> {
        self.store.flush().await
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        read(&self.by_entity_id).get(entity_id).cloned()
    }

    /// Entity id registered for a unique id
    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<EntityId> {
        let key = (domain.to_string(), platform.to_string(), unique_id.to_string());
        let entity_id = self.by_key.get(&key)?.clone();
        self.get(&entity_id).map(|entry| entry.entity_id.clone())
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        read(&self.by_entity_id)
            .values()
            .filter(|e| e.config_entry_id.as_deref() == Some(config_entry_id))
            .cloned()
            .collect()
    }

    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        read(&self.by_entity_id)
            .values()
            .filter(|e| e.device_id.as_deref() == Some(device_id))
            .cloned()
            .collect()
    }

    /// Return the entry for a unique id, registering it if it is new.
    ///
    /// Known entities keep their entity id; their config entry, device and
    /// name are refreshed. A new entity gets an id generated from
    /// `suggested_name` that is neither registered nor `taken`.
    pub fn get_or_create<F>(
        &self,
        registration: EntityRegistration<'_>,
        taken: F,
    ) -> Result<Arc<EntityEntry>, EntityIdError>
    where
        F: Fn(&str) -> bool,
    {
        let key = (
            registration.domain.to_string(),
            registration.platform.to_string(),
            registration.unique_id.to_string(),
        );

        let (action, entry) = {
            let mut entities = write(&self.by_entity_id);
            let existing = self
                .by_key
                .get(&key)
                .and_then(|entity_id| entities.get(entity_id.as_str()).cloned());

            match existing {
                Some(old) => {
                    let mut entry = (*old).clone();
                    entry.config_entry_id = registration.config_entry_id.map(String::from);
                    entry.device_id = registration.device_id.map(String::from);
                    entry.original_name = registration.original_name.map(String::from);
                    if entry == *old {
                        return Ok(old);
                    }
                    entry.modified_at = Utc::now();
                    let entry = Arc::new(entry);
                    entities.insert(entry.entity_id.to_string(), Arc::clone(&entry));
                    (RegistryAction::Update, entry)
                }
                None => {
                    let entity_id = EntityId::generate(
                        registration.domain,
                        registration.suggested_name,
                        |candidate| entities.contains_key(candidate) || taken(candidate),
                    )?;
                    let now = Utc::now();
                    let entry = Arc::new(EntityEntry {
                        id: Ulid::new().to_string().to_lowercase(),
                        entity_id,
                        unique_id: registration.unique_id.to_string(),
                        platform: registration.platform.to_string(),
                        config_entry_id: registration.config_entry_id.map(String::from),
                        device_id: registration.device_id.map(String::from),
                        original_name: registration.original_name.map(String::from),
                        created_at: now,
                        modified_at: now,
                    });
                    let entity_id = entry.entity_id.to_string();
                    self.by_key.insert(key, entity_id.clone());
                    entities.insert(entity_id, Arc::clone(&entry));
                    (RegistryAction::Create, entry)
                }
            }
        };

        if action == RegistryAction::Create {
            info!(unique_id = registration.unique_id, "Registered new entity: {}", entry.entity_id);
        } else {
            debug!(entity_id = %entry.entity_id, "Updated entity registration");
        }
        self.changed(action, &entry.entity_id.to_string());
        Ok(entry)
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let removed = write(&self.by_entity_id).shift_remove(entity_id)?;
        self.by_key.remove(&removed.key());

        info!("Removed entity registration: {}", entity_id);
        self.changed(RegistryAction::Remove, entity_id);
        Some(removed)
    }

    /// Remove every entity of a config entry; returns how many were removed
    pub fn clear_config_entry(&self, config_entry_id: &str) -> usize {
        let entity_ids: Vec<String> = self
            .get_by_config_entry_id(config_entry_id)
            .iter()
            .map(|e| e.entity_id.to_string())
            .collect();
        entity_ids
            .iter()
            .filter(|entity_id| self.remove(entity_id).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        read(&self.by_entity_id).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn changed(&self, action: RegistryAction, entity_id: &str) {
        self.event_bus.fire_typed(
            EntityRegistryUpdatedData {
                action,
                entity_id: entity_id.to_string(),
            },
            Context::new(),
        );
        self.store.delay_save(self.snapshot(), SAVE_DELAY);
    }

    fn snapshot(&self) -> EntityRegistryData {
        EntityRegistryData {
            entities: read(&self.by_entity_id).values().map(|e| (**e).clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> (Arc<EventBus>, EntityRegistry) {
        let bus = Arc::new(EventBus::new());
        let storage = Arc::new(Storage::new(dir.path()));
        (bus.clone(), EntityRegistry::new(storage, bus))
    }

    fn battery<'a>(suggested_name: &'a str) -> EntityRegistration<'a> {
        EntityRegistration {
            domain: "sensor",
            platform: "demo",
            unique_id: "SN-0042_battery",
            suggested_name,
            config_entry_id: Some("entry1"),
            device_id: None,
            original_name: Some("Battery"),
        }
    }

    #[tokio::test]
    async fn test_entity_id_sticks_to_unique_id() {
        let dir = TempDir::new().unwrap();
        let (_, reg) = registry(&dir);

        let first = reg.get_or_create(battery("Thermostat Battery"), |_| false).unwrap();
        assert_eq!(first.entity_id.to_string(), "sensor.thermostat_battery");
        assert_eq!(first.id.len(), 26);

        let renamed = reg.get_or_create(battery("Hallway Battery"), |_| false).unwrap();
        assert_eq!(renamed, first);
        assert_eq!(
            reg.get_entity_id("sensor", "demo", "SN-0042_battery").unwrap().to_string(),
            "sensor.thermostat_battery"
        );
        assert!(reg.get_entity_id("sensor", "other", "SN-0042_battery").is_none());
    }

    #[tokio::test]
    async fn test_new_ids_avoid_registered_and_taken() {
        let dir = TempDir::new().unwrap();
        let (_, reg) = registry(&dir);
        reg.get_or_create(battery("Thermostat Battery"), |_| false).unwrap();

        let second = reg
            .get_or_create(
                EntityRegistration {
                    unique_id: "SN-0043_battery",
                    ..battery("Thermostat Battery")
                },
                |candidate| candidate == "sensor.thermostat_battery_2",
            )
            .unwrap();
        assert_eq!(second.entity_id.to_string(), "sensor.thermostat_battery_3");

        let invalid = reg.get_or_create(
            EntityRegistration {
                domain: "Bad Domain",
                ..battery("x")
            },
            |_| false,
        );
        assert!(invalid.is_err());
    }

    #[tokio::test]
    async fn test_updates_device_and_fires_events() {
        let dir = TempDir::new().unwrap();
        let (bus, reg) = registry(&dir);
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        let entry = reg.get_or_create(battery("Thermostat Battery"), |_| false).unwrap();
        reg.get_or_create(battery("Thermostat Battery"), |_| false).unwrap();
        let moved = reg
            .get_or_create(
                EntityRegistration {
                    device_id: Some("dev1"),
                    ..battery("Thermostat Battery")
                },
                |_| false,
            )
            .unwrap();
        assert_eq!(moved.device_id.as_deref(), Some("dev1"));
        assert_eq!(moved.created_at, entry.created_at);
        assert_eq!(reg.get_by_device_id("dev1").len(), 1);

        assert_eq!(reg.clear_config_entry("entry1"), 1);
        assert!(reg.is_empty());
        assert!(reg.get_entity_id("sensor", "demo", "SN-0042_battery").is_none());

        let actions: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().data.action).collect();
        assert_eq!(
            actions,
            vec![RegistryAction::Create, RegistryAction::Update, RegistryAction::Remove]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let (_, reg) = registry(&dir);
        let entry = reg.get_or_create(battery("Thermostat Battery"), |_| false).unwrap();
        reg.flush().await.unwrap();

        let (_, reloaded) = registry(&dir);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get("sensor.thermostat_battery"), Some(entry));

        // The stored id wins over a new suggestion
        let again = reloaded.get_or_create(battery("Hallway Battery"), |_| false).unwrap();
        assert_eq!(again.entity_id.to_string(), "sensor.thermostat_battery");
    }
}
