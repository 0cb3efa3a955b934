//! Host configuration
//!
//! `configuration.yaml` is read with three custom tags:
//!
//! - `!include path` pulls in another YAML file, relative to the including one
//! - `!secret key` substitutes a value from `secrets.yaml`
//! - `!env_var NAME` substitutes an environment variable
//!
//! The loaded tree is then parsed into a [`HostConfig`]. Sections the host
//! does not know about are kept for integrations.
//!
//! ```ignore
//! let config = ha_config::HostConfig::load("/config")?;
//! let cooldown = config.coordinator.request_refresh_cooldown();
//! ```

mod error;
mod host_config;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use host_config::{CoordinatorConfig, CoreSection, HostConfig, LoggerConfig, CONFIG_FILE};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::{Secrets, SECRETS_FILE};

pub use serde_yaml::Value;
