//! Demo integration
//!
//! A battery-powered thermostat reached over the network. It shows the
//! complete shape of a polling integration: a client library behind
//! traits, one coordinator per entry, entities built from description
//! tables, and a config flow with reauthentication.
//!
//! The server binary runs it against [`SimulatedConnector`].

mod client;
mod config_flow;
mod coordinator;
mod entities;
mod options_flow;
mod simulated;

pub use client::{ClientError, Connector, DeviceClient, DeviceDetails, DeviceStatus};
pub use config_flow::{
    DemoConfigFlow, ABORT_UNIQUE_ID_MISMATCH, CONF_HOST, CONF_PASSWORD, ERROR_CANNOT_CONNECT,
    ERROR_INVALID_AUTH,
};
pub use coordinator::{DemoCoordinator, DemoSource, SCAN_INTERVAL};
pub use entities::{
    build_entities, device_identity, BINARY_SENSORS, MAX_TARGET_TEMPERATURE,
    MIN_TARGET_TEMPERATURE, SENSORS,
};
pub use options_flow::{
    scan_interval_option, DemoOptionsFlow, CONF_SCAN_INTERVAL, ERROR_INVALID_SCAN_INTERVAL,
    SCAN_INTERVAL_RANGE,
};
pub use simulated::{SimulatedConnector, SimulatedDevice};

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntry, ConfigEntrySource, ConfigEntryUpdate, ConfigFlow, EntryData, FlowOutcome, Hass,
    Integration,
};
use ha_coordinator::REQUEST_REFRESH_DEFAULT_COOLDOWN;
use ha_core::SetupError;
use ha_entity::EntityPlatform;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DOMAIN: &str = "demo";

/// Entry version written by this integration. 1.1 entries kept the host
/// under `address`.
pub const ENTRY_VERSION: (u32, u32) = (1, 2);

const LEGACY_CONF_ADDRESS: &str = "address";

/// What a loaded demo entry keeps in [`Hass::data`]
pub struct DemoRuntime {
    pub coordinator: DemoCoordinator,
    pub platform: EntityPlatform,
    pub client: Arc<dyn DeviceClient>,
    pub details: DeviceDetails,
}

pub struct DemoIntegration {
    connector: Arc<dyn Connector>,
    scan_interval: Duration,
    request_refresh_cooldown: Duration,
}

impl DemoIntegration {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            scan_interval: SCAN_INTERVAL,
            request_refresh_cooldown: REQUEST_REFRESH_DEFAULT_COOLDOWN,
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_request_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.request_refresh_cooldown = cooldown;
        self
    }

    /// Create entries for the devices listed under `demo:` in
    /// `configuration.yaml`. Devices that already have an entry are skipped.
    pub async fn import_config(hass: &Hass, devices: &serde_json::Value) -> usize {
        let Some(devices) = devices.as_array() else {
            warn!("Expected a list of devices under '{}:'", DOMAIN);
            return 0;
        };

        let mut created = 0;
        for device in devices {
            let Some(fields) = device.as_object() else {
                warn!("Ignoring invalid {} device: {}", DOMAIN, device);
                continue;
            };
            let data: EntryData = fields.clone().into_iter().collect();
            match hass
                .config_entries
                .flow_init(DOMAIN, ConfigEntrySource::Import, Some(data))
                .await
            {
                Ok(result) => match result.outcome {
                    FlowOutcome::CreateEntry { title, .. } => {
                        info!("Imported {} device {}", DOMAIN, title);
                        created += 1;
                    }
                    FlowOutcome::Abort { reason } => {
                        debug!("Import of {} device skipped: {}", DOMAIN, reason)
                    }
                    FlowOutcome::Form { .. } => {}
                },
                Err(err) => error!("Import of {} device failed: {}", DOMAIN, err),
            }
        }
        created
    }
}

async fn disconnect(client: &Arc<dyn DeviceClient>) {
    if let Err(err) = client.disconnect().await {
        warn!("Error disconnecting: {}", err);
    }
}

#[async_trait]
impl Integration for DemoIntegration {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn version(&self) -> (u32, u32) {
        ENTRY_VERSION
    }

    async fn migrate_entry(
        &self,
        hass: &Arc<Hass>,
        entry: &ConfigEntry,
    ) -> Result<bool, SetupError> {
        if entry.version != ENTRY_VERSION.0 {
            return Ok(false);
        }
        // Newer minor versions stay readable
        if entry.minor_version >= ENTRY_VERSION.1 {
            return Ok(true);
        }
        let mut data = entry.data.clone();
        if let Some(address) = data.remove(LEGACY_CONF_ADDRESS) {
            data.entry(CONF_HOST.to_string()).or_insert(address);
        }
        let (version, minor_version) = ENTRY_VERSION;
        hass.config_entries
            .update(
                &entry.entry_id,
                ConfigEntryUpdate::new()
                    .data(data)
                    .version(version, minor_version),
            )
            .await
            .map_err(|err| SetupError::Failed(err.to_string()))?;
        Ok(true)
    }

    async fn setup_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> Result<(), SetupError> {
        let host = entry
            .data_str(CONF_HOST)
            .ok_or_else(|| SetupError::Failed(format!("entry has no {}", CONF_HOST)))?;
        let password = entry.data_str(CONF_PASSWORD).unwrap_or_default();
        let client = self.connector.connect(host).await?;

        let weak = Arc::downgrade(hass);
        let entry_id = entry.entry_id.clone();
        let (fatal_hass, fatal_entry_id) = (weak.clone(), entry_id.clone());
        let mut builder = DemoCoordinator::builder(
            format!("{} {}", DOMAIN, entry.title),
            DemoSource::new(Arc::clone(&client), password),
        )
        .request_refresh_cooldown(self.request_refresh_cooldown)
        .on_auth_failed(move |_| {
            if let Some(hass) = weak.upgrade() {
                hass.config_entries.request_reauth(&entry_id);
            }
        })
        .on_fatal(move |err| {
            if let Some(hass) = fatal_hass.upgrade() {
                hass.config_entries
                    .request_reconfigure(&fatal_entry_id, err.message());
            }
        });
        if !entry.pref_disable_polling {
            builder = builder
                .update_interval(scan_interval_option(entry).unwrap_or(self.scan_interval));
        }
        let coordinator = builder.build();

        let details = match coordinator.first_refresh().await {
            Ok(()) => client.device_details().await.map_err(SetupError::from),
            Err(err) => Err(err),
        };
        let details = match details {
            Ok(details) => details,
            Err(err) => {
                coordinator.shutdown();
                disconnect(&client).await;
                return Err(err);
            }
        };

        let platform = EntityPlatform::new(
            DOMAIN,
            &entry.entry_id,
            Arc::clone(&hass.states),
            Arc::clone(&hass.registries.entities),
            Arc::clone(&hass.registries.devices),
        );
        let identity = device_identity(&entry.title, &details);
        if let Err(err) = platform.add_entities(build_entities(&coordinator, &identity)) {
            platform.unload();
            coordinator.shutdown();
            disconnect(&client).await;
            return Err(SetupError::Failed(err.to_string()));
        }

        hass.data.insert(
            entry.entry_id.clone(),
            DemoRuntime {
                coordinator,
                platform,
                client,
                details,
            },
        );
        Ok(())
    }

    async fn unload_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> Result<bool, SetupError> {
        let Some(runtime) = hass.data.get::<DemoRuntime>(&entry.entry_id) else {
            return Ok(true);
        };
        runtime.platform.unload();
        runtime.coordinator.shutdown();
        disconnect(&runtime.client).await;
        Ok(true)
    }

    fn config_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        Some(Box::new(DemoConfigFlow::new(Arc::clone(&self.connector))))
    }

    fn options_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        Some(Box::new(DemoOptionsFlow::new(self.scan_interval)))
    }
}
