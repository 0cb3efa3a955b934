//! `secrets.yaml` lookup for the `!secret` tag

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const SECRETS_FILE: &str = "secrets.yaml";

/// Values from `secrets.yaml`, kept with their YAML type so that a secret
/// port stays a number after substitution
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: Mapping,
}

impl Secrets {
    /// Read `secrets.yaml` from `config_dir`; a missing file means no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join(SECRETS_FILE);
        if !path.exists() {
            debug!("No {} in {:?}", SECRETS_FILE, config_dir);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let values = match serde_yaml::from_str(&content).map_err(|source| {
            ConfigError::ParseYaml {
                path: path.clone(),
                source,
            }
        })? {
            Value::Mapping(values) => values,
            Value::Null => Mapping::new(),
            _ => return Err(ConfigError::invalid(SECRETS_FILE, "must be a mapping")),
        };

        debug!("Loaded {} secrets", values.len());
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
