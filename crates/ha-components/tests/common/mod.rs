#![allow(dead_code)]

use async_trait::async_trait;
use ha_components::demo::{
    ClientError, Connector, DemoIntegration, DemoRuntime, DeviceClient, DeviceDetails,
    DeviceStatus, CONF_HOST, CONF_PASSWORD, DOMAIN, ENTRY_VERSION,
};
use ha_config_entries::{ConfigEntry, EntryData, Hass};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const HOST: &str = "10.0.0.2";
pub const PASSWORD: &str = "hunter2";
pub const SERIAL: &str = "SN-0042";

/// Scripted device: fetches return the current status unless a failure is
/// queued, commands mutate the status
pub struct FakeDevice {
    serial: String,
    password: Mutex<String>,
    authenticated: AtomicBool,
    status: Mutex<DeviceStatus>,
    failures: Mutex<VecDeque<ClientError>>,
    fetch_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetches: AtomicUsize,
    pub commands: AtomicUsize,
    pub identifies: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Self::with_serial(SERIAL)
    }

    pub fn with_serial(serial: &str) -> Arc<Self> {
        Arc::new(Self {
            serial: serial.to_string(),
            password: Mutex::new(PASSWORD.to_string()),
            authenticated: AtomicBool::new(false),
            status: Mutex::new(DeviceStatus {
                battery: Some(42),
                temperature: Some(21.5),
                charging: Some(false),
                power: false,
                target_temperature: 21.0,
                min_temperature: 5.0,
                max_temperature: 30.0,
            }),
            failures: Mutex::new(VecDeque::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            identifies: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn set_battery(&self, level: Option<u8>) {
        self.status.lock().unwrap().battery = level;
    }

    /// Target range the device reports
    pub fn set_bounds(&self, min: f64, max: f64) {
        let mut status = self.status.lock().unwrap();
        status.min_temperature = min;
        status.max_temperature = max;
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.lock().unwrap().clone()
    }

    /// Make the next fetch fail with `err`
    pub fn fail_next(&self, err: ClientError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Change the password on the device, dropping the current session
    pub fn change_password(&self, password: &str) {
        *self.password.lock().unwrap() = password.to_string();
        self.authenticated.store(false, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_session(&self) -> Result<(), ClientError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::InvalidAuth)
        }
    }
}

pub fn timeout() -> ClientError {
    ClientError::Connection {
        host: HOST.to_string(),
        reason: "connection reset".to_string(),
    }
}

#[async_trait]
impl DeviceClient for FakeDevice {
    async fn authenticate(&self, password: &str) -> Result<(), ClientError> {
        let ok = *self.password.lock().unwrap() == password;
        self.authenticated.store(ok, Ordering::SeqCst);
        if ok {
            Ok(())
        } else {
            Err(ClientError::InvalidAuth)
        }
    }

    async fn device_details(&self) -> Result<DeviceDetails, ClientError> {
        self.check_session()?;
        Ok(DeviceDetails {
            serial: self.serial.clone(),
            model: "T-100".to_string(),
            firmware: "2.0.1".to_string(),
        })
    }

    async fn fetch_status(&self) -> Result<DeviceStatus, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.check_session()?;
        Ok(self.status())
    }

    async fn set_power(&self, on: bool) -> Result<(), ClientError> {
        self.check_session()?;
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().power = on;
        Ok(())
    }

    async fn set_target_temperature(&self, celsius: f64) -> Result<(), ClientError> {
        self.check_session()?;
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().target_temperature = celsius;
        Ok(())
    }

    async fn identify(&self) -> Result<(), ClientError> {
        self.check_session()?;
        self.identifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connects to one [`FakeDevice`] at [`HOST`]
pub struct FakeConnector {
    device: Arc<FakeDevice>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceClient>, ClientError> {
        if host != HOST {
            return Err(ClientError::Connection {
                host: host.to_string(),
                reason: "no route to host".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.device) as Arc<dyn DeviceClient>)
    }
}

pub struct Harness {
    // Held so the storage directory outlives the host
    _dir: TempDir,
    pub hass: Arc<Hass>,
    pub device: Arc<FakeDevice>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_integration(FakeDevice::new(), |integration| integration)
    }

    pub fn with_integration(
        device: Arc<FakeDevice>,
        configure: impl FnOnce(DemoIntegration) -> DemoIntegration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let hass = Hass::new(dir.path());
        let connector = FakeConnector::new(Arc::clone(&device));
        let integration = configure(DemoIntegration::new(
            Arc::clone(&connector) as Arc<dyn Connector>
        ));
        hass.config_entries.register_integration(Arc::new(integration));
        Self {
            _dir: dir,
            hass,
            device,
            connector,
        }
    }

    /// Add a "Thermostat" entry for the fake device, without setting it up
    pub async fn add_entry(&self) -> String {
        let entry = ConfigEntry::new(DOMAIN, "Thermostat")
            .with_data(credentials(PASSWORD))
            .with_unique_id(SERIAL)
            .with_version(ENTRY_VERSION.0, ENTRY_VERSION.1);
        self.hass.config_entries.add(entry).await.unwrap().entry_id
    }

    pub fn runtime(&self, entry_id: &str) -> Option<Arc<DemoRuntime>> {
        self.hass.data.get::<DemoRuntime>(entry_id)
    }

    pub fn state(&self, entity_id: &str) -> Option<String> {
        self.hass.states.get_state(entity_id)
    }

    /// Every entity id the demo entry published, across platforms
    pub fn published(&self) -> Vec<String> {
        ["sensor", "binary_sensor", "switch", "number", "button"]
            .into_iter()
            .flat_map(|domain| self.hass.states.entity_ids(domain))
            .collect()
    }
}

pub fn credentials(password: &str) -> EntryData {
    EntryData::from([
        (CONF_HOST.to_string(), json!(HOST)),
        (CONF_PASSWORD.to_string(), json!(password)),
    ])
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
