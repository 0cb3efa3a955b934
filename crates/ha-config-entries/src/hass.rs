//! The host handle passed to every integration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ha_core::{events::HOMEASSISTANT_STOP, Context, Event};
use ha_event_bus::EventBus;
use ha_registries::{Registries, Storage};
use ha_state_machine::StateMachine;
use tracing::{error, info};

use crate::manager::{ConfigEntries, ConfigEntriesResult};
use crate::runtime_data::RuntimeData;

/// Everything an integration may touch during setup and unload
pub struct Hass {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateMachine>,
    pub registries: Registries,
    pub config_entries: ConfigEntries,
    /// Per-entry objects created by `setup_entry`
    pub data: RuntimeData,
    config_dir: PathBuf,
}

impl Hass {
    pub fn new(config_dir: impl AsRef<Path>) -> Arc<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        Arc::new_cyclic(|hass| {
            let bus = Arc::new(EventBus::new());
            let registries = Registries::new(&config_dir, Arc::clone(&bus));
            let config_entries =
                ConfigEntries::new(hass.clone(), Arc::clone(&registries.storage), Arc::clone(&bus));
            Self {
                states: Arc::new(StateMachine::new(Arc::clone(&bus))),
                registries,
                config_entries,
                data: RuntimeData::new(),
                bus,
                config_dir,
            }
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.registries.storage
    }

    /// Load registries and entries, then set up every entry
    pub async fn start(&self) -> ConfigEntriesResult<()> {
        self.registries.load_all().await?;
        self.config_entries.load().await?;

        let results = self.config_entries.setup_all().await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Started with {} config entries ({} not loaded)",
            results.len(),
            failed
        );
        Ok(())
    }

    /// Unload every entry and write everything still pending
    pub async fn stop(&self) {
        self.bus.fire(Event::new(
            HOMEASSISTANT_STOP,
            serde_json::Value::Null,
            Context::new(),
        ));
        self.config_entries.unload_all().await;

        if let Err(err) = self.config_entries.flush().await {
            error!("Error writing config entries: {}", err);
        }
        if let Err(err) = self.registries.flush_all().await {
            error!("Error writing registries: {}", err);
        }
        info!("Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_and_stop_empty() {
        let temp_dir = TempDir::new().unwrap();
        let hass = Hass::new(temp_dir.path());
        let mut stop = hass.bus.subscribe(HOMEASSISTANT_STOP);

        hass.start().await.unwrap();
        assert!(hass.config_entries.is_empty());
        assert_eq!(hass.config_dir(), temp_dir.path());

        hass.registries
            .categories
            .create("automation", "Heating", None)
            .unwrap();
        hass.stop().await;
        assert!(stop.try_recv().is_ok());
        assert!(hass.storage().exists("core.category_registry").await);
    }
}
