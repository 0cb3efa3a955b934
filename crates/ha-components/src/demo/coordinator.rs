//! Polling of one demo device

use async_trait::async_trait;
use ha_coordinator::{DataSource, DataUpdateCoordinator, UpdateFailed};
use std::sync::Arc;
use std::time::Duration;

use super::client::{DeviceClient, DeviceStatus};

pub const SCAN_INTERVAL: Duration = Duration::from_secs(15);

pub type DemoCoordinator = DataUpdateCoordinator<DemoSource>;

pub struct DemoSource {
    client: Arc<dyn DeviceClient>,
    password: String,
}

impl DemoSource {
    pub fn new(client: Arc<dyn DeviceClient>, password: impl Into<String>) -> Self {
        Self {
            client,
            password: password.into(),
        }
    }

    pub fn client(&self) -> &Arc<dyn DeviceClient> {
        &self.client
    }
}

#[async_trait]
impl DataSource for DemoSource {
    type Data = DeviceStatus;

    async fn setup(&self) -> Result<(), UpdateFailed> {
        Ok(self.client.authenticate(&self.password).await?)
    }

    async fn fetch(&self) -> Result<DeviceStatus, UpdateFailed> {
        Ok(self.client.fetch_status().await?)
    }
}
