//! Entity identifiers of the form `domain.object_id`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("invalid domain '{0}'")]
    InvalidDomain(String),

    #[error("invalid object_id '{0}'")]
    InvalidObjectId(String),
}

/// Identifier of a published entity (e.g. `sensor.kitchen_battery`).
///
/// Both halves are lowercase ASCII alphanumerics and underscores and may not
/// start or end with an underscore; the domain may not contain `__`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if domain.contains("__") || !is_slug(&domain) {
            return Err(EntityIdError::InvalidDomain(domain));
        }
        if !is_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectId(object_id));
        }

        Ok(Self { domain, object_id })
    }

    /// Build an id for `name` in `domain` that is not in `taken`.
    ///
    /// The name is slugified; collisions get `_2`, `_3`, ... appended. An
    /// empty slug falls back to the domain name.
    pub fn generate<F>(domain: &str, name: &str, taken: F) -> Result<Self, EntityIdError>
    where
        F: Fn(&str) -> bool,
    {
        let mut base = slugify(name);
        if base.is_empty() {
            base = domain.to_string();
        }

        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken(&format!("{}.{}", domain, candidate)) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        Self::new(domain, candidate)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

fn is_slug(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Lowercase `text` and collapse every run of non-alphanumerics to `_`.
pub fn slugify(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
        } else if !result.is_empty() && !result.ends_with('_') {
            result.push('_');
        }
    }
    result.trim_end_matches('_').to_string()
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse() {
        let id: EntityId = "sensor.battery".parse().unwrap();
        assert_eq!(id.domain(), "sensor");
        assert_eq!(id.object_id(), "battery");
        assert_eq!(id.to_string(), "sensor.battery");
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(
            "nodot".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            "a.b.c".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            ".battery".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyDomain
        );
        assert!(matches!(
            "Sensor.battery".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomain(_))
        ));
        assert!(matches!(
            "my__sensor.battery".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomain(_))
        ));
        assert!(matches!(
            "sensor._battery".parse::<EntityId>(),
            Err(EntityIdError::InvalidObjectId(_))
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Kitchen Scale  Battery"), "kitchen_scale_battery");
        assert_eq!(slugify("Pool-Dosing (pH)"), "pool_dosing_ph");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_generate_deduplicates() {
        let taken: HashSet<String> = ["sensor.battery".to_string(), "sensor.battery_2".to_string()]
            .into_iter()
            .collect();

        let id = EntityId::generate("sensor", "Battery", |c| taken.contains(c)).unwrap();
        assert_eq!(id.to_string(), "sensor.battery_3");

        let id = EntityId::generate("switch", "", |_| false).unwrap();
        assert_eq!(id.to_string(), "switch.switch");
    }

    #[test]
    fn test_serde_as_string() {
        let id = EntityId::new("switch", "power").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"switch.power\"");
        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
