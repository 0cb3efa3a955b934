//! Polling coordinator shared by integrations
//!
//! A [`DataUpdateCoordinator`] wraps one [`DataSource`] (the integration's
//! client), refreshes it on a timer while entities listen, and classifies
//! failures so the host can retry, ask for new credentials, or give up.

mod coordinator;
mod debounce;
mod error;

pub use coordinator::{
    CoordinatorBuilder, DataSource, DataUpdateCoordinator, FailureHook, Listener, ListenerId,
    REQUEST_REFRESH_DEFAULT_COOLDOWN,
};
pub use debounce::Debouncer;
pub use error::{ErrorKind, UpdateFailed, UpdateResult};
