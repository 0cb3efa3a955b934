//! Typed view of `configuration.yaml`

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "configuration.yaml";

/// Seconds a manual refresh request waits before hitting the device
const DEFAULT_REQUEST_REFRESH_COOLDOWN: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSection {
    pub name: String,
    /// Directory that holds `.storage/`; the config directory when unset
    pub storage_dir: Option<PathBuf>,
}

impl Default for CoreSection {
    fn default() -> Self {
        Self {
            name: "Home".to_string(),
            storage_dir: None,
        }
    }
}

/// `logger:` section; accepts `warning`, `critical` and `notset` besides the tracing levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub default: String,
    /// Per-target overrides, e.g. `ha_coordinator: debug`
    pub logs: BTreeMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            default: "info".to_string(),
            logs: BTreeMap::new(),
        }
    }
}

impl LoggerConfig {
    /// The config as `tracing` filter directives: `warn,ha_coordinator=debug`
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![tracing_level(&self.default).to_string()];
        directives.extend(
            self.logs
                .iter()
                .map(|(target, level)| format!("{}={}", target.replace('.', "::"), tracing_level(level))),
        );
        directives.join(",")
    }
}

fn tracing_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "critical" | "fatal" | "error" => "error",
        "warning" | "warn" => "warn",
        "debug" => "debug",
        "notset" | "trace" => "trace",
        _ => "info",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(rename = "request_refresh_cooldown")]
    cooldown_secs: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_REQUEST_REFRESH_COOLDOWN,
        }
    }
}

impl CoordinatorConfig {
    pub fn request_refresh_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

/// The host's own sections plus whatever else the file contains
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    pub homeassistant: CoreSection,
    pub logger: LoggerConfig,
    pub coordinator: CoordinatorConfig,
    sections: Mapping,
}

impl HostConfig {
    /// Load `configuration.yaml` from `config_dir`. A missing file gives the
    /// defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            return Ok(Self::default());
        }
        Self::from_yaml(load_yaml(config_dir, CONFIG_FILE)?)
    }

    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        let mut sections = match yaml {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => return Err(ConfigError::invalid("root", "configuration must be a mapping")),
        };

        let config = Self {
            homeassistant: take_section(&mut sections, "homeassistant")?,
            logger: take_section(&mut sections, "logger")?,
            coordinator: take_section(&mut sections, "coordinator")?,
            sections,
        };

        let cooldown = config.coordinator.cooldown_secs;
        if !cooldown.is_finite() || cooldown < 0.0 {
            return Err(ConfigError::invalid(
                "coordinator.request_refresh_cooldown",
                "must be a non-negative number of seconds",
            ));
        }
        Ok(config)
    }

    /// Raw section for an integration domain, e.g. `demo:`
    pub fn section(&self, domain: &str) -> Option<&Value> {
        self.sections.get(domain)
    }

    /// Domains that have a top-level section
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().filter_map(Value::as_str)
    }

    /// Where `.storage/` lives for a host started from `config_dir`
    pub fn storage_root(&self, config_dir: &Path) -> PathBuf {
        match &self.homeassistant.storage_dir {
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        }
    }
}

fn take_section<T>(sections: &mut Mapping, key: &str) -> ConfigResult<T>
where
    T: DeserializeOwned + Default,
{
    match sections.remove(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_yaml::from_value(value).map_err(|e| ConfigError::invalid(key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> ConfigResult<HostConfig> {
        HostConfig::from_yaml(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.homeassistant.name, "Home");
        assert_eq!(config.logger.filter_directives(), "info");
        assert_eq!(
            config.coordinator.request_refresh_cooldown(),
            Duration::from_secs(10)
        );
        assert_eq!(config.domains().count(), 0);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
homeassistant:
  name: Cabin
  storage_dir: data
logger:
  default: warning
  logs:
    ha_coordinator: debug
    ha_components.demo: critical
coordinator:
  request_refresh_cooldown: 0.5
demo:
  scan_interval: 15
"#,
        )
        .unwrap();

        assert_eq!(config.homeassistant.name, "Cabin");
        assert_eq!(
            config.storage_root(Path::new("/config")),
            PathBuf::from("/config/data")
        );
        assert_eq!(
            config.logger.filter_directives(),
            "warn,ha_components::demo=error,ha_coordinator=debug"
        );
        assert_eq!(
            config.coordinator.request_refresh_cooldown(),
            Duration::from_millis(500)
        );
        assert_eq!(config.section("demo").unwrap()["scan_interval"].as_u64(), Some(15));
        assert!(config.section("homeassistant").is_none());
        assert_eq!(config.domains().collect::<Vec<_>>(), vec!["demo"]);
    }

    #[test]
    fn test_empty_sections_use_defaults() {
        let config = parse("homeassistant:\nlogger:\n").unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_invalid_sections() {
        assert!(matches!(
            parse("- not a mapping"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("coordinator:\n  request_refresh_cooldown: -1\n"),
            Err(ConfigError::InvalidValue { key, .. }) if key == "coordinator.request_refresh_cooldown"
        ));
        assert!(matches!(
            parse("logger:\n  logs: [debug]\n"),
            Err(ConfigError::InvalidValue { key, .. }) if key == "logger"
        ));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(HostConfig::load(dir.path()).unwrap(), HostConfig::default());

        std::fs::write(dir.path().join("secrets.yaml"), "home_name: Lake House\n").unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "homeassistant:\n  name: !secret home_name\n",
        )
        .unwrap();
        let config = HostConfig::load(dir.path()).unwrap();
        assert_eq!(config.homeassistant.name, "Lake House");
        assert_eq!(config.storage_root(dir.path()), dir.path());
    }
}
