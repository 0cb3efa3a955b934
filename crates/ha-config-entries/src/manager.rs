//! Config Entries Manager
//!
//! Owns every config entry and drives its lifecycle: setup through the
//! registered [`Integration`], retries with backoff, reauthentication,
//! unload and persistence.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ha_core::{Context, SetupError};
use ha_event_bus::EventBus;
use ha_registries::{Storable, Storage, StorageError, Store};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{
    ConfigEntry, ConfigEntryState, ConfigEntryStateChangedData, ConfigEntryUpdate, EntryData,
};
use crate::flow::{ConfigFlow, FlowProgress, SharedFlow};
use crate::hass::Hass;
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Delay before changed entries are written
pub const SAVE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Unload of entry {0} failed")]
    UnloadFailed(String),

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Migration of entry {0} failed")]
    MigrationFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Home Assistant is shutting down")]
    NotRunning,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// What the host calls into an integration.
///
/// `setup_entry` builds the client, coordinator and entities of one entry
/// and stores them in [`Hass::data`]. `unload_entry` tears them down;
/// whatever it leaves in the runtime data is dropped by the host anyway.
#[async_trait]
pub trait Integration: Send + Sync + 'static {
    fn domain(&self) -> &str;

    /// `(version, minor_version)` of the entries this integration writes
    fn version(&self) -> (u32, u32) {
        (1, 1)
    }

    /// Bring an entry written with another version up to
    /// [`version`](Self::version), usually through [`ConfigEntries::update`].
    /// Returns false if the entry cannot be migrated.
    ///
    /// Without an override only minor version changes are accepted.
    async fn migrate_entry(
        &self,
        _hass: &Arc<Hass>,
        entry: &ConfigEntry,
    ) -> Result<bool, SetupError> {
        Ok(entry.version == self.version().0)
    }

    async fn setup_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Returns false if the entry could not be unloaded
    async fn unload_entry(&self, hass: &Arc<Hass>, entry: &ConfigEntry)
        -> Result<bool, SetupError>;

    /// Called after the options of a loaded entry changed
    async fn options_updated(
        &self,
        hass: &Arc<Hass>,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<()> {
        hass.config_entries.reload(&entry.entry_id).await
    }

    fn config_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        None
    }

    /// Wizard that edits the options of an existing entry
    fn options_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        None
    }
}

/// Run once when the entry unloads or its setup fails
pub type UnloadCallback = Box<dyn FnOnce() + Send + Sync>;

/// Config Entries Manager
pub struct ConfigEntries {
    hass: Weak<Hass>,
    bus: Arc<EventBus>,
    store: Store<ConfigEntriesData>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    integrations: DashMap<String, Arc<dyn Integration>>,

    /// Pending setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,

    on_unload: DashMap<String, Vec<UnloadCallback>>,

    pub(crate) flows: DashMap<String, SharedFlow>,
    pub(crate) flow_progress: DashMap<String, FlowProgress>,
    /// Options flows: flow_id -> entry_id
    pub(crate) options_flows: DashMap<String, String>,
}

impl ConfigEntries {
    pub fn new(hass: Weak<Hass>, storage: Arc<Storage>, bus: Arc<EventBus>) -> Self {
        Self {
            hass,
            bus,
            store: Store::new(storage),
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            integrations: DashMap::new(),
            retry_tasks: DashMap::new(),
            on_unload: DashMap::new(),
            flows: DashMap::new(),
            flow_progress: DashMap::new(),
            options_flows: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(data) = self.store.load(None).await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Write pending changes now
    pub async fn flush(&self) -> ConfigEntriesResult<()> {
        self.store.flush().await?;
        Ok(())
    }

    fn schedule_save(&self) {
        let mut entries: Vec<ConfigEntry> =
            self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        self.store
            .delay_save(ConfigEntriesData { entries }, SAVE_DELAY);
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration: {}", domain);
        self.integrations.insert(domain, integration);
    }

    pub fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|r| Arc::clone(r.value()))
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a new config entry; it is not set up
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.schedule_save();

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(Some(ref unique_id)) = update.unique_id {
            if let Some(other) = self.get_by_unique_id(&entry.domain, unique_id) {
                if other.entry_id != entry.entry_id {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
            }
        }

        self.unindex_entry(&entry);

        let mut updated = entry;
        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        if let Some(pref) = update.pref_disable_polling {
            updated.pref_disable_polling = pref;
        }
        if let Some(disabled_by) = update.disabled_by {
            updated.disabled_by = disabled_by;
        }
        if let Some((version, minor_version)) = update.version {
            updated.version = version;
            updated.minor_version = minor_version;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.schedule_save();

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Replace an entry's options and let its integration react
    pub async fn update_options(
        &self,
        entry_id: &str,
        options: EntryData,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .update(entry_id, ConfigEntryUpdate::new().options(options))
            .await?;

        if entry.is_loaded() {
            let hass = self.hass.upgrade().ok_or(ConfigEntriesError::NotRunning)?;
            if let Some(integration) = self.integration(&entry.domain) {
                integration.options_updated(&hass, &entry).await?;
            }
        }
        Ok(self.get(entry_id).unwrap_or(entry))
    }

    /// Unload (if needed) and delete an entry, with its devices and
    /// entity registrations
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state != ConfigEntryState::NotLoaded && entry.state.is_recoverable() {
            if let Err(err) = self.unload(entry_id).await {
                warn!("Error unloading entry {} before removal: {}", entry_id, err);
            }
        }

        self.abort_entry_flows(entry_id);
        self.unindex_entry(&entry);
        self.schedule_save();
        if let Some(hass) = self.hass.upgrade() {
            hass.registries.clear_config_entry(entry_id);
        }

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    /// Register a callback run on the next unload of `entry_id`
    pub fn on_unload<F>(&self, entry_id: &str, callback: F)
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.on_unload
            .entry(entry_id.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let changed = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            entry.try_set_state(state, reason.clone())?;
            ConfigEntryStateChangedData {
                entry_id: entry_id.to_string(),
                domain: entry.domain.clone(),
                state,
                reason,
            }
        };

        debug!("Entry {} state changed to {:?}", entry_id, state);
        self.bus.fire_typed(changed, Context::new());
        Ok(())
    }

    /// Drop everything setup left behind for an entry
    fn release_entry(&self, entry_id: &str) {
        if let Some(hass) = self.hass.upgrade() {
            hass.data.remove(entry_id);
        }
        if let Some((_, callbacks)) = self.on_unload.remove(entry_id) {
            for callback in callbacks {
                callback();
            }
        }
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
            debug!("Cancelled pending setup retry of {}", entry_id);
        }
    }

    fn schedule_retry(&self, entry_id: &str, delay: Duration) {
        let hass = self.hass.clone();
        let id = entry_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(hass) = hass.upgrade() else {
                return;
            };
            // Detach first so setup does not abort the task running it
            hass.config_entries.retry_tasks.remove(&id);
            if let Err(err) = hass.config_entries.setup(&id).await {
                debug!("Setup retry of {} failed: {}", id, err);
            }
        });

        if let Some(previous) = self.retry_tasks.insert(entry_id.to_string(), task) {
            previous.abort();
        }
    }

    /// Start a reauth flow for `entry_id` in the background. Usable from
    /// sync callbacks such as a coordinator's auth hook.
    pub fn request_reauth(&self, entry_id: &str) {
        let hass = self.hass.clone();
        let id = entry_id.to_string();
        tokio::spawn(async move {
            let Some(hass) = hass.upgrade() else {
                return;
            };
            if let Err(err) = hass.config_entries.start_reauth(&id).await {
                warn!("Could not start reauth flow for {}: {}", id, err);
            }
        });
    }

    /// Take down a loaded entry that failed at runtime in the background.
    /// Usable from sync callbacks such as a coordinator's fatal hook.
    pub fn request_reconfigure(&self, entry_id: &str, reason: impl Into<String>) {
        let hass = self.hass.clone();
        let id = entry_id.to_string();
        let reason = reason.into();
        tokio::spawn(async move {
            let Some(hass) = hass.upgrade() else {
                return;
            };
            if let Err(err) = hass.config_entries.fail_entry(&id, reason).await {
                warn!("Could not take down failed entry {}: {}", id, err);
            }
        });
    }

    /// Unload a loaded entry and leave it in `SetupError` with `reason`
    /// until it is reconfigured or reloaded. Entries that are not loaded
    /// are left alone.
    #[instrument(skip(self, reason))]
    pub async fn fail_entry(&self, entry_id: &str, reason: String) -> ConfigEntriesResult<()> {
        let setup_lock = self
            .entries
            .get(entry_id)
            .map(|e| Arc::clone(&e.setup_lock))
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let _guard = setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if !entry.is_loaded() {
            debug!("Entry {} is {:?}, nothing to take down", entry_id, entry.state);
            return Ok(());
        }

        error!(
            "Config entry '{}' for {} failed and needs reconfiguration: {}",
            entry.title, entry.domain, reason
        );
        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;
        if let (Some(integration), Some(hass)) =
            (self.integration(&entry.domain), self.hass.upgrade())
        {
            match integration.unload_entry(&hass, &entry).await {
                Ok(true) => {}
                Ok(false) => warn!("Integration {} did not unload '{}'", entry.domain, entry.title),
                Err(err) => error!(
                    "Error unloading entry '{}' for {}: {}",
                    entry.title, entry.domain, err
                ),
            }
        }
        self.release_entry(entry_id);
        self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason))
    }

    /// Bring the stored entry to the integration's version. False when
    /// it cannot be used.
    async fn migrate(
        &self,
        hass: &Arc<Hass>,
        integration: &Arc<dyn Integration>,
        entry: &ConfigEntry,
    ) -> bool {
        let (version, minor_version) = integration.version();
        if entry.version == version && entry.minor_version == minor_version {
            return true;
        }
        if entry.version > version {
            error!(
                "Entry '{}' for {} has version {}.{}, newer than the supported {}.{}",
                entry.title, entry.domain, entry.version, entry.minor_version, version, minor_version
            );
            return false;
        }

        match integration.migrate_entry(hass, entry).await {
            Ok(true) => {
                info!(
                    "Migrated entry '{}' for {} from version {}.{}",
                    entry.title, entry.domain, entry.version, entry.minor_version
                );
                true
            }
            Ok(false) => {
                error!(
                    "Migration handler for {} failed for entry '{}'",
                    entry.domain, entry.title
                );
                false
            }
            Err(err) => {
                error!("Error migrating entry '{}' for {}: {}", entry.title, entry.domain, err);
                false
            }
        }
    }

    /// Set up an entry through its integration.
    ///
    /// Entries stored with another version are migrated first. A
    /// `NotReady` failure schedules another attempt with backoff; an
    /// `AuthFailed` failure starts a reauth flow. Either way the runtime
    /// data of the failed attempt is dropped.
    #[instrument(skip(self))]
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let setup_lock = self
            .entries
            .get(entry_id)
            .map(|e| Arc::clone(&e.setup_lock))
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let _guard = setup_lock.lock().await;

        self.cancel_retry(entry_id);
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() || entry.is_ignored() {
            debug!("Skipping setup of {} entry {}", entry.source, entry_id);
            return Ok(());
        }
        let hass = self.hass.upgrade().ok_or(ConfigEntriesError::NotRunning)?;

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integration(&entry.domain) else {
            error!("Integration {} not found for entry {}", entry.domain, entry_id);
            self.set_state(
                entry_id,
                ConfigEntryState::SetupError,
                Some(format!("Integration {} not found", entry.domain)),
            )?;
            return Err(ConfigEntriesError::IntegrationNotFound(entry.domain));
        };

        if !self.migrate(&hass, &integration, &entry).await {
            self.set_state(entry_id, ConfigEntryState::MigrationError, None)?;
            return Err(ConfigEntriesError::MigrationFailed(entry_id.to_string()));
        }
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let err = match integration.setup_entry(&hass, &entry).await {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup of {} entry '{}' completed", entry.domain, entry.title);
                return Ok(());
            }
            Err(err) => err,
        };

        self.release_entry(entry_id);

        match &err {
            SetupError::NotReady(reason) => {
                let tries = self
                    .entries
                    .get_mut(entry_id)
                    .map(|mut e| e.increment_tries())
                    .unwrap_or_default();
                let delay = calculate_retry_delay(tries);
                if tries == 0 {
                    warn!(
                        "Config entry '{}' for {} integration not ready yet: {}; Retrying in background",
                        entry.title, entry.domain, reason
                    );
                } else {
                    debug!(
                        "Config entry '{}' for {} integration not ready yet: {}; Retrying in {:?}",
                        entry.title, entry.domain, reason, delay
                    );
                }
                self.set_state(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                self.schedule_retry(entry_id, delay);
            }
            SetupError::AuthFailed(reason) => {
                error!(
                    "Config entry '{}' for {} integration could not authenticate: {}",
                    entry.title, entry.domain, reason
                );
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                self.request_reauth(entry_id);
            }
            SetupError::Failed(reason) => {
                error!(
                    "Error setting up entry '{}' for {}: {}",
                    entry.title, entry.domain, reason
                );
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
            }
        }

        Err(err.into())
    }

    /// Unload an entry.
    ///
    /// Integration failures are logged and leave the entry in
    /// `FailedUnload`; runtime data and unload callbacks are released
    /// regardless. Returns whether the integration unloaded cleanly.
    #[instrument(skip(self))]
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let setup_lock = self
            .entries
            .get(entry_id)
            .map(|e| Arc::clone(&e.setup_lock))
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let _guard = setup_lock.lock().await;

        self.cancel_retry(entry_id);
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(true),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state))
            }
            _ => {}
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let mut unloaded = true;
        if entry.is_loaded() {
            if let (Some(integration), Some(hass)) =
                (self.integration(&entry.domain), self.hass.upgrade())
            {
                unloaded = match integration.unload_entry(&hass, &entry).await {
                    Ok(result) => {
                        if !result {
                            warn!("Integration {} did not unload '{}'", entry.domain, entry.title);
                        }
                        result
                    }
                    Err(err) => {
                        error!(
                            "Error unloading entry '{}' for {}: {}",
                            entry.title, entry.domain, err
                        );
                        false
                    }
                };
            }
        }

        self.release_entry(entry_id);

        if unloaded {
            self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
            info!("Unloaded entry: {} ({})", entry.title, entry_id);
        } else {
            self.set_state(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("Unload failed".to_string()),
            )?;
        }
        Ok(unloaded)
    }

    /// Unload then set up again
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        if !self.unload(entry_id).await? {
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }
        self.setup(entry_id).await
    }

    /// Set up every entry that is not loaded yet
    pub async fn setup_all(&self) -> Vec<ConfigEntriesResult<()>> {
        let mut pending: Vec<ConfigEntry> = self
            .entries
            .iter()
            .filter(|r| r.state == ConfigEntryState::NotLoaded)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut results = Vec::with_capacity(pending.len());
        for entry in pending {
            results.push(self.setup(&entry.entry_id).await);
        }
        results
    }

    /// Unload every entry, logging failures
    pub async fn unload_all(&self) {
        for entry_id in self.entry_ids() {
            let state = match self.get(&entry_id) {
                Some(entry) => entry.state,
                None => continue,
            };
            if state == ConfigEntryState::NotLoaded || !state.is_recoverable() {
                continue;
            }
            match self.unload(&entry_id).await {
                Ok(true) => {}
                Ok(false) => warn!("Entry {} failed to unload", entry_id),
                Err(err) => error!("Error unloading entry {}: {}", entry_id, err),
            }
        }
    }
}
