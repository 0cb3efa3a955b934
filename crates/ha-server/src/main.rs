//! Integration host
//!
//! Loads `configuration.yaml`, sets up every config entry and runs until
//! ctrl-c. Usage: `homeassistant [CONFIG_DIR]` (default `./config`, or
//! `$HA_CONFIG_DIR`).

use anyhow::{anyhow, Context, Result};
use ha_components::demo::{DemoIntegration, SimulatedConnector, DOMAIN as DEMO_DOMAIN};
use ha_config::{HostConfig, LoggerConfig};
use ha_config_entries::Hass;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Password accepted by every simulated demo device
const SIMULATED_PASSWORD: &str = "demo";

fn config_dir(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// `RUST_LOG` wins over the `logger:` section
fn init_logging(logger: &LoggerConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logger.filter_directives())
            .context("invalid logger configuration")?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = config_dir(
        std::env::args().nth(1),
        std::env::var("HA_CONFIG_DIR").ok(),
    );
    let config = HostConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    init_logging(&config.logger)?;

    info!(
        "Starting {} with configuration in {}",
        config.homeassistant.name,
        config_dir.display()
    );

    let hass = Hass::new(config.storage_root(&config_dir));
    let demo = DemoIntegration::new(Arc::new(SimulatedConnector::new(SIMULATED_PASSWORD)))
        .with_request_refresh_cooldown(config.coordinator.request_refresh_cooldown());
    hass.config_entries.register_integration(Arc::new(demo));

    hass.start().await.context("starting config entries")?;

    if let Some(section) = config.section(DEMO_DOMAIN) {
        let devices = serde_json::to_value(section).context("reading demo devices")?;
        let imported = DemoIntegration::import_config(&hass, &devices).await;
        if imported > 0 {
            info!("Imported {} demo devices from configuration", imported);
        }
    }

    info!("Running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    hass.stop().await;
    Ok(())
}
