//! Config Entries
//!
//! Config entries are the persisted, user-configured instances of an
//! integration. This crate owns their lifecycle (setup, retry, reauth,
//! unload, reload), the config flows that create them, and the [`Hass`]
//! handle integrations receive.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntries`] - Manager for all config entries and flows
//! - [`Integration`] - What the host calls into an integration
//! - [`ConfigFlow`] - The setup wizard of an integration
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries`.

pub mod entry;
pub mod flow;
pub mod hass;
pub mod manager;
pub mod runtime_data;
mod state_machine;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState,
    ConfigEntryStateChangedData, ConfigEntryUpdate, EntryData,
};
pub use flow::{
    ConfigFlow, FlowContext, FlowError, FlowInput, FlowOutcome, FlowProgress, FlowResult,
    FlowStep, FormField, ABORT_ALREADY_CONFIGURED, ABORT_ALREADY_IN_PROGRESS,
    ABORT_REAUTH_SUCCESSFUL, STEP_INIT,
};
pub use hass::Hass;
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, Integration,
    UnloadCallback, SAVE_DELAY, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
pub use runtime_data::RuntimeData;
pub use state_machine::{calculate_retry_delay, InvalidTransition};
