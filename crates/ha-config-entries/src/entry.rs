//! Config Entry types
//!
//! A ConfigEntry represents a single configured instance of an integration:
//! one device or one account.

use chrono::{DateTime, Utc};
use ha_core::EventData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::state_machine::InvalidTransition;

/// Flat key/value record written by a config flow
pub type EntryData = HashMap<String, serde_json::Value>;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being configured (non-recoverable)
    SetupInProgress,
    /// Successfully set up (recoverable)
    Loaded,
    /// Setup failed (recoverable)
    SetupError,
    /// Waiting to retry setup (recoverable)
    SetupRetry,
    /// Version migration failed (not recoverable)
    MigrationError,
    /// Currently unloading (non-recoverable)
    UnloadInProgress,
    /// Unload failed (not recoverable)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// Where a config entry (or the flow creating it) came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured via UI/API
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// Generic discovery
    Discovery,
    /// DHCP discovery
    Dhcp,
    /// mDNS/Bonjour discovery
    Zeroconf,
    /// Bluetooth device discovery
    Bluetooth,
    /// User hiding a discovery; never set up
    Ignore,
    /// Re-authentication flow
    Reauth,
    /// User reconfiguring existing entry
    Reconfigure,
    /// System-created entry
    System,
}

impl ConfigEntrySource {
    /// Name of the first flow step for this source
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEntrySource::User => "user",
            ConfigEntrySource::Import => "import",
            ConfigEntrySource::Discovery => "discovery",
            ConfigEntrySource::Dhcp => "dhcp",
            ConfigEntrySource::Zeroconf => "zeroconf",
            ConfigEntrySource::Bluetooth => "bluetooth",
            ConfigEntrySource::Ignore => "ignore",
            ConfigEntrySource::Reauth => "reauth",
            ConfigEntrySource::Reconfigure => "reconfigure",
            ConfigEntrySource::System => "system",
        }
    }
}

impl std::fmt::Display for ConfigEntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    /// Disabled by the user
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "demo")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Connection parameters collected by the config flow
    #[serde(default)]
    pub data: EntryData,

    /// User-configurable options
    #[serde(default)]
    pub options: EntryData,

    /// Major schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Minor schema version
    #[serde(default = "default_minor_version")]
    pub minor_version: u32,

    /// Device identity used to reject duplicates within a domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Origin type
    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Per-entry setup/unload lock (not persisted)
    #[serde(skip)]
    pub setup_lock: Arc<Mutex<()>>,

    /// Number of setup retry attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    /// Only refresh on demand, never on a timer
    #[serde(default)]
    pub pref_disable_polling: bool,

    /// What disabled this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_minor_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: EntryData::new(),
            options: EntryData::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            setup_lock: Arc::new(Mutex::new(())),
            tries: 0,
            pref_disable_polling: false,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: EntryData) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: EntryData) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = version;
        self.minor_version = minor_version;
        self
    }

    /// Read a string value from `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_ignored(&self) -> bool {
        self.source == ConfigEntrySource::Ignore
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// On success, updates the state and reason fields. The retry counter
    /// survives only retry cycles.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;

        self.state = new_state;
        self.reason = reason;

        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }

        Ok(())
    }

    /// Increment the retry counter and return the previous count
    pub fn increment_tries(&mut self) -> u32 {
        let tries = self.tries;
        self.tries += 1;
        tries
    }
}

/// Update data for a config entry
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<EntryData>,
    pub options: Option<EntryData>,
    pub unique_id: Option<Option<String>>,
    pub pref_disable_polling: Option<bool>,
    pub disabled_by: Option<Option<ConfigEntryDisabledBy>>,
    /// `(version, minor_version)`, set by migrations
    pub version: Option<(u32, u32)>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: EntryData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: EntryData) -> Self {
        self.options = Some(options);
        self
    }

    pub fn unique_id(mut self, unique_id: Option<String>) -> Self {
        self.unique_id = Some(unique_id);
        self
    }

    pub fn pref_disable_polling(mut self, disable: bool) -> Self {
        self.pref_disable_polling = Some(disable);
        self
    }

    pub fn disabled_by(mut self, disabled_by: Option<ConfigEntryDisabledBy>) -> Self {
        self.disabled_by = Some(disabled_by);
        self
    }

    pub fn version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = Some((version, minor_version));
        self
    }
}

/// Payload of `config_entry_state_changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntryStateChangedData {
    pub entry_id: String,
    pub domain: String,
    pub state: ConfigEntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventData for ConfigEntryStateChangedData {
    fn event_type() -> &'static str {
        ha_core::events::CONFIG_ENTRY_STATE_CHANGED
    }
}
