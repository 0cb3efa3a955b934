//! Refresh failure taxonomy

use ha_core::SetupError;
use thiserror::Error;

/// How the coordinator reacts to a failed refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection resets, 5xx. Retried on the next tick.
    Transient,
    /// Credentials rejected. Polling stops until the user reauthenticates.
    AuthRequired,
    /// Anything retrying cannot fix. Polling stops.
    Fatal,
}

/// A refresh failed.
///
/// Integrations convert their client errors into this type, usually with a
/// `From` impl, so nothing library-specific reaches the coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct UpdateFailed {
    kind: ErrorKind,
    message: String,
}

impl UpdateFailed {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::AuthRequired
    }

    /// Whether scheduled polling continues after this failure
    pub fn keeps_polling(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<UpdateFailed> for SetupError {
    fn from(err: UpdateFailed) -> Self {
        match err.kind {
            ErrorKind::Transient => SetupError::NotReady(err.message),
            ErrorKind::AuthRequired => SetupError::AuthFailed(err.message),
            ErrorKind::Fatal => SetupError::Failed(err.message),
        }
    }
}

pub type UpdateResult<T> = Result<T, UpdateFailed>;
