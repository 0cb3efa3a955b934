//! Call coalescing with a cooldown

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

type DebouncedFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct DebounceState {
    /// Running cooldown, if any
    timer: Option<JoinHandle<()>>,
    /// A call arrived during the cooldown
    pending: bool,
    shut_down: bool,
}

/// Runs a function at most once per cooldown.
///
/// The first call runs immediately and starts the cooldown. Calls made
/// while the cooldown runs collapse into a single trailing run when it
/// ends, which starts a new cooldown.
pub struct Debouncer {
    cooldown: Duration,
    function: DebouncedFn,
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new<F>(cooldown: Duration, function: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            cooldown,
            function: Arc::new(function),
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub async fn call(&self) {
        {
            let mut state = lock(&self.state);
            if state.shut_down {
                return;
            }
            if state.timer.is_some() {
                trace!("Debouncer in cooldown, deferring call");
                state.pending = true;
                return;
            }
            state.timer = Some(self.spawn_cooldown());
        }

        (self.function)().await;
    }

    /// Cancel the cooldown and drop any deferred call
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        state.shut_down = true;
        state.pending = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    fn spawn_cooldown(&self) -> JoinHandle<()> {
        let cooldown = self.cooldown;
        let function = Arc::clone(&self.function);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cooldown).await;
                {
                    let mut state = lock(&state);
                    if !state.pending || state.shut_down {
                        state.timer = None;
                        return;
                    }
                    state.pending = false;
                }
                trace!("Running deferred call");
                function().await;
            }
        })
    }
}

fn lock(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
