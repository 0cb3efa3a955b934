//! Failure signals that cross the integration boundary
//!
//! Integrations never hand raw client errors to the host. Setup code
//! reports a [`SetupError`], user-triggered actions report a
//! [`HomeAssistantError`].

use thiserror::Error;

/// Why `setup_entry` did not complete.
///
/// The host reacts differently to each variant: `NotReady` schedules an
/// automatic retry, `AuthFailed` asks the user for new credentials, and
/// `Failed` leaves the entry in an error state until it is reloaded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Device or service temporarily unreachable
    #[error("not ready: {0}")]
    NotReady(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Anything retrying cannot fix
    #[error("setup failed: {0}")]
    Failed(String),
}

impl SetupError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SetupError::NotReady(_))
    }
}

/// Error raised to the caller of an entity action (turn on, set value, ...)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HomeAssistantError {
    /// The requested value was rejected before reaching the device
    #[error("value {value} for {entity_id} is outside the range {min} - {max}")]
    OutOfRange {
        entity_id: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The entity does not support the requested action
    #[error("{entity_id} does not support {action}")]
    NotSupported { entity_id: String, action: String },

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The device or service rejected or failed the command
    #[error("command failed: {0}")]
    Command(String),
}
