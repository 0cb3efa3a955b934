//! Core types for the integration host
//!
//! This crate provides the types shared by every other crate in the
//! workspace: entity identity, published entity state, events, and the
//! small set of failure signals that cross the integration boundary.

mod context;
mod entity_id;
mod event;
mod exceptions;
mod platform;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use exceptions::{HomeAssistantError, SetupError};
pub use platform::Platform;
pub use state::State;

/// Maximum length for a state value
pub const MAX_STATE_LENGTH: usize = 255;

/// State value for entities whose data source cannot be read
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value for entities that are available but have no value yet
pub const STATE_UNKNOWN: &str = "unknown";

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// An entity state was written or removed
    pub const STATE_CHANGED: &str = "state_changed";

    /// A config entry moved to a new lifecycle state
    pub const CONFIG_ENTRY_STATE_CHANGED: &str = "config_entry_state_changed";

    /// A category was created, updated or removed
    pub const CATEGORY_REGISTRY_UPDATED: &str = "category_registry_updated";

    pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

    pub const DEVICE_REGISTRY_UPDATED: &str = "device_registry_updated";

    /// The host is shutting down
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
