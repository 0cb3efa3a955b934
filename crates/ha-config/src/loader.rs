//! YAML loading with the `!include`, `!secret` and `!env_var` tags

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, outermost first
    include_chain: Vec<PathBuf>,
}

impl YamlLoader {
    /// Loader rooted at `config_dir`, reading `secrets.yaml` from it
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_chain: Vec::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load `path` (relative to the config dir) and resolve every tag in it
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(path.as_ref());
        if self.include_chain.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }
        debug!("Loading {:?}", path);

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_chain.push(path.clone());
        let result = self.load_str(&content, &path);
        self.include_chain.pop();
        result
    }

    /// Parse `content` as if it were read from `origin`
    pub fn load_str(&mut self, content: &str, origin: &Path) -> ConfigResult<Value> {
        let value = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: origin.to_path_buf(),
            source,
        })?;
        self.resolve(value, origin)
    }

    fn resolve(&mut self, value: Value, origin: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, origin),
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key, self.resolve(value, origin)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, origin))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, origin: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving {} in {:?}", tag, origin);

        match tag.as_str() {
            "!include" => {
                let target = tag_argument(&tag, &tagged.value)?;
                let base = origin.parent().unwrap_or(&self.config_dir);
                let path = base.join(target);
                self.load_file(path)
            }
            "!secret" => {
                let key = tag_argument(&tag, &tagged.value)?;
                self.secrets.get(key).cloned()
            }
            "!env_var" => {
                // `!env_var NAME` or `!env_var NAME fallback`
                let argument = tag_argument(&tag, &tagged.value)?;
                let (var, fallback) = match argument.split_once(char::is_whitespace) {
                    Some((var, fallback)) => (var, Some(fallback.trim())),
                    None => (argument, None),
                };
                match (std::env::var(var), fallback) {
                    (Ok(value), _) => Ok(Value::String(value)),
                    (Err(_), Some(fallback)) => Ok(Value::String(fallback.to_string())),
                    (Err(_), None) => Err(ConfigError::EnvVarNotFound {
                        var: var.to_string(),
                    }),
                }
            }
            _ => {
                let value = self.resolve(tagged.value, origin)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }
}

fn tag_argument<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(tag, "argument must be a string"))
}

/// Load `file` from `config_dir` with `secrets.yaml` from the same directory
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "packages/demo.yaml", "scan: !include scan.yaml\n");
        write(dir.path(), "packages/scan.yaml", "interval: 15\n");
        write(
            dir.path(),
            "configuration.yaml",
            "demo: !include packages/demo.yaml\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert_eq!(value["demo"]["scan"]["interval"].as_u64(), Some(15));
    }

    #[test]
    fn test_secret_substitution() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "device_password: hunter2\n");
        write(
            dir.path(),
            "configuration.yaml",
            "demo:\n  - password: !secret device_password\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert_eq!(value["demo"][0]["password"].as_str(), Some("hunter2"));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "configuration.yaml", "password: !secret nope\n");

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { key }) if key == "nope"));
    }

    #[test]
    fn test_env_var_with_fallback() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HA_CONFIG_TEST_NAME", "Cabin");
        write(
            dir.path(),
            "configuration.yaml",
            "name: !env_var HA_CONFIG_TEST_NAME\n\
             level: !env_var HA_CONFIG_TEST_UNSET warning\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert_eq!(value["name"].as_str(), Some("Cabin"));
        assert_eq!(value["level"].as_str(), Some("warning"));
        std::env::remove_var("HA_CONFIG_TEST_NAME");

        write(dir.path(), "other.yaml", "x: !env_var HA_CONFIG_TEST_UNSET\n");
        assert!(matches!(
            load_yaml(dir.path(), "other.yaml"),
            Err(ConfigError::EnvVarNotFound { .. })
        ));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_same_file_included_twice_is_not_circular() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "shared.yaml", "value: 1\n");
        write(
            dir.path(),
            "configuration.yaml",
            "first: !include shared.yaml\nsecond: !include shared.yaml\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert_eq!(value["second"]["value"].as_u64(), Some(1));
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "configuration.yaml", "when: !input start_time\n");

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert!(matches!(value["when"], Value::Tagged(_)));
    }
}
