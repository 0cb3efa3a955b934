//! Lifecycle transitions of a config entry
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress
//!                            ↘ SetupRetry → SetupInProgress
//!                            ↘ MigrationError
//!
//! Loaded | SetupError | SetupRetry → UnloadInProgress → NotLoaded
//!                                                    ↘ FailedUnload
//!                                                    ↘ SetupError
//! ```
//!
//! `UnloadInProgress → SetupError` takes down an entry that failed while
//! loaded; it waits there for a reload or reconfiguration.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::entry::ConfigEntryState;

/// Upper bound of the exponent in the setup retry backoff
const MAX_RETRY_EXPONENT: u32 = 4;

/// Base of the setup retry backoff, in seconds
const RETRY_BASE_SECS: u64 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Validate a move to `to`, returning the new state
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded | SetupError | SetupRetry | MigrationError)
                | (SetupError | SetupRetry, SetupInProgress | UnloadInProgress)
                | (Loaded, UnloadInProgress)
                | (UnloadInProgress, NotLoaded | FailedUnload | SetupError)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: rejection_reason(self, to),
            })
        }
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

fn rejection_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
    use ConfigEntryState::*;

    match (from, to) {
        (MigrationError, _) | (FailedUnload, _) => "state is terminal until restart",
        (SetupInProgress, _) => "setup is still running",
        (UnloadInProgress, _) => "unload is still running",
        (NotLoaded, _) => "entry must be set up first",
        (Loaded, SetupInProgress) => "entry is loaded, unload it first",
        (Loaded, _) => "entry must be unloaded first",
        _ => "transition not allowed",
    }
}

/// Wait before setup attempt `tries + 1`: `2^min(tries, 4) * 5s` plus up to
/// 100ms of jitter. Gives 5s, 10s, 20s, 40s, then 80s for every later try.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base = Duration::from_secs(2_u64.pow(tries.min(MAX_RETRY_EXPONENT)) * RETRY_BASE_SECS);
    let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..100_000));
    base + jitter
}
