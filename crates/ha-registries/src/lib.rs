//! Persistent registries
//!
//! JSON persistence in the `.storage/` directory with versioned envelopes,
//! debounced writes, and the category, device and entity registries built
//! on top of it.

pub mod category_registry;
pub mod device_registry;
pub mod entity_registry;
pub mod storage;

pub use category_registry::{
    CategoryAction, CategoryEntry, CategoryError, CategoryRegistry, CategoryRegistryData,
    CategoryRegistryUpdatedData, CategoryResult, CategoryUpdate,
};
pub use device_registry::{
    DeviceEntry, DeviceIdentifier, DeviceInfo, DeviceRegistry, DeviceRegistryData,
    DeviceRegistryUpdatedData,
};
pub use entity_registry::{
    EntityEntry, EntityRegistration, EntityRegistry, EntityRegistryData,
    EntityRegistryUpdatedData, RegistryAction,
};
pub use storage::{
    load_with_migration, MigrationFn, Storable, Storage, StorageError, StorageFile,
    StorageResult, Store,
};

use ha_event_bus::EventBus;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Delay between a registry mutation and the write it schedules
pub const SAVE_DELAY: Duration = Duration::from_secs(10);

/// The registries of one config directory
pub struct Registries {
    pub storage: Arc<Storage>,
    pub categories: CategoryRegistry,
    pub devices: Arc<DeviceRegistry>,
    pub entities: Arc<EntityRegistry>,
}

impl Registries {
    pub fn new(config_dir: impl AsRef<std::path::Path>, event_bus: Arc<EventBus>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));
        Self {
            categories: CategoryRegistry::new(storage.clone(), event_bus.clone()),
            devices: Arc::new(DeviceRegistry::new(storage.clone(), event_bus.clone())),
            entities: Arc::new(EntityRegistry::new(storage.clone(), event_bus)),
            storage,
        }
    }

    pub async fn load_all(&self) -> StorageResult<()> {
        self.categories.load().await?;
        self.devices.load().await?;
        self.entities.load().await
    }

    /// Write everything still waiting on a delayed save
    pub async fn flush_all(&self) -> StorageResult<()> {
        self.categories.flush().await?;
        self.devices.flush().await?;
        self.entities.flush().await
    }

    /// Forget the devices and entities of a removed config entry
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        self.entities.clear_config_entry(config_entry_id);
        self.devices.clear_config_entry(config_entry_id);
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
