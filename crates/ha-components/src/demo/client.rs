//! Device library boundary
//!
//! The demo integration talks to its device through these two traits
//! only. [`Connector`] opens a connection from the entry's host,
//! [`DeviceClient`] is the open connection. Their errors are
//! [`ClientError`] and never leave the integration: the coordinator
//! boundary turns them into [`UpdateFailed`], entity actions into
//! [`HomeAssistantError`].

use async_trait::async_trait;
use ha_coordinator::UpdateFailed;
use ha_core::{HomeAssistantError, SetupError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("cannot reach {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("request timed out")]
    Timeout,

    #[error("invalid credentials")]
    InvalidAuth,

    /// The device answered with something the client does not understand
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("device rejected the command: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::InvalidAuth)
    }
}

impl From<ClientError> for UpdateFailed {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection { .. } | ClientError::Timeout | ClientError::Protocol(_) => {
                UpdateFailed::transient(err.to_string())
            }
            ClientError::InvalidAuth => UpdateFailed::auth(err.to_string()),
            // The device refuses to serve this entry until it is reconfigured
            ClientError::Rejected(_) => UpdateFailed::fatal(err.to_string()),
        }
    }
}

impl From<ClientError> for HomeAssistantError {
    fn from(err: ClientError) -> Self {
        HomeAssistantError::Command(err.to_string())
    }
}

/// Errors while connecting during setup, before any coordinator exists
impl From<ClientError> for SetupError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection { .. } | ClientError::Timeout | ClientError::Protocol(_) => {
                SetupError::NotReady(err.to_string())
            }
            ClientError::InvalidAuth => SetupError::AuthFailed(err.to_string()),
            ClientError::Rejected(_) => SetupError::Failed(err.to_string()),
        }
    }
}

/// Static facts about a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetails {
    pub serial: String,
    pub model: String,
    pub firmware: String,
}

/// One bulk read of the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Percent
    pub battery: Option<u8>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    pub charging: Option<bool>,
    pub power: bool,
    pub target_temperature: f64,
    /// Lowest target the device accepts
    pub min_temperature: f64,
    pub max_temperature: f64,
}

#[async_trait]
pub trait DeviceClient: Send + Sync + 'static {
    async fn authenticate(&self, password: &str) -> Result<(), ClientError>;

    async fn device_details(&self) -> Result<DeviceDetails, ClientError>;

    async fn fetch_status(&self) -> Result<DeviceStatus, ClientError>;

    async fn set_power(&self, on: bool) -> Result<(), ClientError>;

    async fn set_target_temperature(&self, celsius: f64) -> Result<(), ClientError>;

    /// Blink the device's LED
    async fn identify(&self) -> Result<(), ClientError>;

    async fn disconnect(&self) -> Result<(), ClientError>;
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, host: &str) -> Result<Arc<dyn DeviceClient>, ClientError>;
}

/// Connect, log in and read the device identity in one go. The
/// connection is closed again if any step after connecting fails.
pub async fn open(
    connector: &dyn Connector,
    host: &str,
    password: &str,
) -> Result<(Arc<dyn DeviceClient>, DeviceDetails), ClientError> {
    let client = connector.connect(host).await?;
    let details = match client.authenticate(password).await {
        Ok(()) => client.device_details().await,
        Err(err) => Err(err),
    };
    match details {
        Ok(details) => Ok((client, details)),
        Err(err) => {
            if let Err(close_err) = client.disconnect().await {
                warn!("Error disconnecting from {}: {}", host, close_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_coordinator::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_update_failed_mapping() {
        let connection = ClientError::Connection {
            host: "10.0.0.2".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(UpdateFailed::from(connection).kind(), ErrorKind::Transient);
        assert_eq!(UpdateFailed::from(ClientError::Timeout).kind(), ErrorKind::Transient);
        assert_eq!(
            UpdateFailed::from(ClientError::InvalidAuth).kind(),
            ErrorKind::AuthRequired
        );
        assert_eq!(
            UpdateFailed::from(ClientError::Protocol("truncated frame".into())).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            UpdateFailed::from(ClientError::Rejected("entry revoked".into())).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_setup_error_mapping() {
        assert!(SetupError::from(ClientError::Timeout).is_retryable());
        assert!(matches!(
            SetupError::from(ClientError::InvalidAuth),
            SetupError::AuthFailed(_)
        ));
        assert!(SetupError::from(ClientError::Protocol("garbled".into())).is_retryable());
        assert!(!SetupError::from(ClientError::Rejected("revoked".into())).is_retryable());
    }

    /// Client whose login and disconnect both fail
    #[derive(Default)]
    struct Unreachable {
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl DeviceClient for Unreachable {
        async fn authenticate(&self, _password: &str) -> Result<(), ClientError> {
            Err(ClientError::InvalidAuth)
        }

        async fn device_details(&self) -> Result<DeviceDetails, ClientError> {
            Err(ClientError::Timeout)
        }

        async fn fetch_status(&self) -> Result<DeviceStatus, ClientError> {
            Err(ClientError::Timeout)
        }

        async fn set_power(&self, _on: bool) -> Result<(), ClientError> {
            Err(ClientError::Timeout)
        }

        async fn set_target_temperature(&self, _celsius: f64) -> Result<(), ClientError> {
            Err(ClientError::Timeout)
        }

        async fn identify(&self) -> Result<(), ClientError> {
            Err(ClientError::Timeout)
        }

        async fn disconnect(&self) -> Result<(), ClientError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Timeout)
        }
    }

    struct OneClient(Arc<Unreachable>);

    #[async_trait]
    impl Connector for OneClient {
        async fn connect(&self, _host: &str) -> Result<Arc<dyn DeviceClient>, ClientError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_open_keeps_first_error_when_close_fails() {
        let client = Arc::new(Unreachable::default());
        let connector = OneClient(Arc::clone(&client));

        let result = open(&connector, "10.0.0.2", "wrong").await;
        assert!(matches!(result, Err(ClientError::InvalidAuth)));
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_action_error_mapping() {
        let err = HomeAssistantError::from(ClientError::Rejected("busy".into()));
        assert_eq!(err, HomeAssistantError::Command("device rejected the command: busy".into()));
    }
}
