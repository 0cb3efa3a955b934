//! In-process device used by the server binary

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::client::{ClientError, Connector, DeviceClient, DeviceDetails, DeviceStatus};

const MIN_TARGET: f64 = 5.0;
const MAX_TARGET: f64 = 30.0;
const AMBIENT: f64 = 18.0;

struct Simulation {
    connected: bool,
    authenticated: bool,
    battery: f64,
    temperature: f64,
    charging: bool,
    power: bool,
    target: f64,
}

impl Simulation {
    /// Advance one poll: the battery drains or charges and the temperature
    /// drifts towards the target (or room temperature when off)
    fn step(&mut self) {
        if self.charging {
            self.battery = (self.battery + 2.0).min(100.0);
            self.charging = self.battery < 100.0;
        } else {
            self.battery = (self.battery - 0.5).max(0.0);
            self.charging = self.battery <= 20.0;
        }

        let goal = if self.power { self.target } else { AMBIENT };
        let noise = rand::thread_rng().gen_range(-0.2..0.2);
        self.temperature += (goal - self.temperature) * 0.1 + noise;
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            battery: Some(self.battery.round() as u8),
            temperature: Some((self.temperature * 10.0).round() / 10.0),
            charging: Some(self.charging),
            power: self.power,
            target_temperature: self.target,
            min_temperature: MIN_TARGET,
            max_temperature: MAX_TARGET,
        }
    }
}

/// A thermostat with a battery, living in memory
pub struct SimulatedDevice {
    host: String,
    details: DeviceDetails,
    password: String,
    sim: Mutex<Simulation>,
}

impl SimulatedDevice {
    pub fn new(host: &str, password: impl Into<String>) -> Self {
        let serial: String = host
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self {
            host: host.to_string(),
            details: DeviceDetails {
                serial: format!("SIM-{}", serial),
                model: "Simulated Thermostat".to_string(),
                firmware: "1.4.2".to_string(),
            },
            password: password.into(),
            sim: Mutex::new(Simulation {
                connected: true,
                authenticated: false,
                battery: 80.0,
                temperature: AMBIENT,
                charging: false,
                power: false,
                target: 21.0,
            }),
        }
    }

    fn sim(&self) -> MutexGuard<'_, Simulation> {
        self.sim.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock for a command, failing when the session is not usable
    fn session(&self) -> Result<MutexGuard<'_, Simulation>, ClientError> {
        let sim = self.sim();
        if !sim.connected {
            return Err(ClientError::Connection {
                host: self.host.clone(),
                reason: "not connected".to_string(),
            });
        }
        if !sim.authenticated {
            return Err(ClientError::InvalidAuth);
        }
        Ok(sim)
    }
}

#[async_trait]
impl DeviceClient for SimulatedDevice {
    async fn authenticate(&self, password: &str) -> Result<(), ClientError> {
        let mut sim = self.sim();
        sim.authenticated = password == self.password;
        if sim.authenticated {
            Ok(())
        } else {
            Err(ClientError::InvalidAuth)
        }
    }

    async fn device_details(&self) -> Result<DeviceDetails, ClientError> {
        self.session()?;
        Ok(self.details.clone())
    }

    async fn fetch_status(&self) -> Result<DeviceStatus, ClientError> {
        let mut sim = self.session()?;
        sim.step();
        Ok(sim.status())
    }

    async fn set_power(&self, on: bool) -> Result<(), ClientError> {
        self.session()?.power = on;
        Ok(())
    }

    async fn set_target_temperature(&self, celsius: f64) -> Result<(), ClientError> {
        if !(MIN_TARGET..=MAX_TARGET).contains(&celsius) {
            return Err(ClientError::Rejected(format!(
                "target {} outside {} - {}",
                celsius, MIN_TARGET, MAX_TARGET
            )));
        }
        self.session()?.target = celsius;
        Ok(())
    }

    async fn identify(&self) -> Result<(), ClientError> {
        self.session()?;
        info!("{} is blinking", self.details.serial);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let mut sim = self.sim();
        sim.connected = false;
        sim.authenticated = false;
        Ok(())
    }
}

/// Hands out one [`SimulatedDevice`] per host, all sharing one password
pub struct SimulatedConnector {
    password: String,
    devices: Mutex<HashMap<String, Arc<SimulatedDevice>>>,
}

impl SimulatedConnector {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            devices: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceClient>, ClientError> {
        if host.trim().is_empty() {
            return Err(ClientError::Connection {
                host: host.to_string(),
                reason: "no host given".to_string(),
            });
        }

        let mut devices = self.devices.lock().unwrap_or_else(|p| p.into_inner());
        let device = devices
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(SimulatedDevice::new(host, self.password.clone())));
        device.sim().connected = true;
        debug!("Connected to simulated device at {}", host);
        Ok(Arc::clone(device) as Arc<dyn DeviceClient>)
    }
}
