//! Published entity state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, MAX_STATE_LENGTH, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// The state of an entity as stored by the host.
///
/// `state` is the rendered value (`"42"`, `"on"`, `"unavailable"`);
/// `last_changed` only moves when that value changes, `last_updated` moves
/// on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    pub last_changed: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,

    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: clamp_state(state.into()),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Next state for the same entity, keeping `last_changed` when the
    /// value did not change.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = clamp_state(new_state.into());
        let changed = self.state != new_state;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// Values longer than the limit are not representable; publish them as unknown.
fn clamp_state(state: String) -> String {
    if state.len() > MAX_STATE_LENGTH {
        STATE_UNKNOWN.to_string()
    } else {
        state
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
