//! Polling data coordinator
//!
//! One coordinator per config entry owns the client, polls it on an
//! interval, and keeps exactly one current snapshot of everything the
//! entry's entities render. Entities subscribe as listeners and re-read the
//! snapshot on every notification; they never call the client for reads.

use async_trait::async_trait;
use dashmap::DashMap;
use ha_core::SetupError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::debounce::Debouncer;
use crate::error::{ErrorKind, UpdateFailed};

/// Cooldown of [`DataUpdateCoordinator::request_refresh`]
pub const REQUEST_REFRESH_DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// The client boundary of a coordinator.
///
/// `fetch` performs one bulk read of everything the entry's entities need.
/// Implementations map every client error into [`UpdateFailed`].
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    /// One-time preparation before the first fetch (login, discovery)
    async fn setup(&self) -> Result<(), UpdateFailed> {
        Ok(())
    }

    async fn fetch(&self) -> Result<Self::Data, UpdateFailed>;
}

/// Handle returned by [`DataUpdateCoordinator::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Called with a failure that stopped polling
pub type FailureHook = Arc<dyn Fn(&UpdateFailed) + Send + Sync>;

struct Status {
    last_update_success: bool,
    last_error: Option<UpdateFailed>,
    /// Scheduled polling halted after an auth or fatal failure
    polling_stopped: bool,
}

struct Inner<S: DataSource> {
    name: String,
    source: S,
    update_interval: Option<Duration>,
    data: watch::Sender<Option<Arc<S::Data>>>,
    status: Mutex<Status>,
    listeners: DashMap<ListenerId, Listener>,
    next_listener_id: AtomicU64,
    /// Held for the duration of a fetch
    refresh_lock: tokio::sync::Mutex<()>,
    /// Completed refreshes, used to coalesce waiters
    refresh_count: AtomicU64,
    timer: Mutex<Option<CancellationToken>>,
    debouncer: Debouncer,
    on_auth_failed: Option<FailureHook>,
    on_fatal: Option<FailureHook>,
    setup_done: AtomicBool,
    shut_down: AtomicBool,
}

/// Polls a [`DataSource`] and fans the result out to listeners.
///
/// Cloning is cheap; all clones share one coordinator.
pub struct DataUpdateCoordinator<S: DataSource> {
    inner: Arc<Inner<S>>,
}

impl<S: DataSource> Clone for DataUpdateCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct CoordinatorBuilder<S: DataSource> {
    name: String,
    source: S,
    update_interval: Option<Duration>,
    request_refresh_cooldown: Duration,
    on_auth_failed: Option<FailureHook>,
    on_fatal: Option<FailureHook>,
}

impl<S: DataSource> CoordinatorBuilder<S> {
    /// Poll every `interval` while anyone listens. Without one the
    /// coordinator only refreshes on demand or through pushed data.
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    pub fn request_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.request_refresh_cooldown = cooldown;
        self
    }

    pub fn on_auth_failed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UpdateFailed) + Send + Sync + 'static,
    {
        self.on_auth_failed = Some(Arc::new(hook));
        self
    }

    /// Run when a refresh after setup fails with [`ErrorKind::Fatal`]; the
    /// host should take the entry down and ask for reconfiguration
    pub fn on_fatal<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UpdateFailed) + Send + Sync + 'static,
    {
        self.on_fatal = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> DataUpdateCoordinator<S> {
        let (data, _) = watch::channel(None);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<S>>| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(self.request_refresh_cooldown, move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = DataUpdateCoordinator { inner }.refresh().await;
                    }
                })
            });

            Inner {
                name: self.name,
                source: self.source,
                update_interval: self.update_interval,
                data,
                status: Mutex::new(Status {
                    last_update_success: true,
                    last_error: None,
                    polling_stopped: false,
                }),
                listeners: DashMap::new(),
                next_listener_id: AtomicU64::new(0),
                refresh_lock: tokio::sync::Mutex::new(()),
                refresh_count: AtomicU64::new(0),
                timer: Mutex::new(None),
                debouncer,
                on_auth_failed: self.on_auth_failed,
                on_fatal: self.on_fatal,
                setup_done: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }
        });
        DataUpdateCoordinator { inner }
    }
}

impl<S: DataSource> DataUpdateCoordinator<S> {
    pub fn builder(name: impl Into<String>, source: S) -> CoordinatorBuilder<S> {
        CoordinatorBuilder {
            name: name.into(),
            source,
            update_interval: None,
            request_refresh_cooldown: REQUEST_REFRESH_DEFAULT_COOLDOWN,
            on_auth_failed: None,
            on_fatal: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.inner.update_interval
    }

    /// Current snapshot; `None` until the first successful refresh
    pub fn data(&self) -> Option<Arc<S::Data>> {
        self.inner.data.borrow().clone()
    }

    /// Receiver that observes every snapshot replacement
    pub fn subscribe_data(&self) -> watch::Receiver<Option<Arc<S::Data>>> {
        self.inner.data.subscribe()
    }

    pub fn last_update_success(&self) -> bool {
        self.status().last_update_success
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.status().last_error.clone()
    }

    /// Whether the periodic timer is currently running
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Prepare the source and load the first snapshot.
    ///
    /// Called from an integration's setup; the error tells the host whether
    /// to retry the setup later or ask for new credentials. A coordinator
    /// that is shut down, before or during the fetch, is not ready.
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }
        if !self.inner.setup_done.load(Ordering::SeqCst) {
            if let Err(err) = self.inner.source.setup().await {
                self.record_failure(&err, true);
                return Err(err.into());
            }
            self.inner.setup_done.store(true, Ordering::SeqCst);
        }

        let _guard = self.inner.refresh_lock.lock().await;
        match self.run_refresh(true).await {
            Some(err) => Err(err.into()),
            None if self.is_shut_down() => Err(self.shut_down_error()),
            None => Ok(()),
        }
    }

    fn shut_down_error(&self) -> SetupError {
        SetupError::NotReady(format!("coordinator {} is shut down", self.inner.name))
    }

    /// Fetch now. A caller that arrives while a refresh is in flight waits
    /// for it instead of starting another.
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        let seen = self.inner.refresh_count.load(Ordering::SeqCst);
        let _guard = self.inner.refresh_lock.lock().await;

        if self.inner.refresh_count.load(Ordering::SeqCst) != seen {
            debug!(name = %self.inner.name, "Joined in-flight refresh");
        } else {
            self.run_refresh(false).await;
        }

        match self.last_error() {
            Some(err) if !self.last_update_success() => Err(err),
            _ => Ok(()),
        }
    }

    /// Debounced refresh for use after entity actions
    pub async fn request_refresh(&self) {
        self.inner.debouncer.call().await;
    }

    /// Replace the snapshot with pushed data and notify, without fetching
    pub fn set_updated_data(&self, data: S::Data) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.inner.data.send_replace(Some(Arc::new(data)));
        self.record_success();
        self.notify_listeners();
    }

    /// Record a pushed failure and notify; the snapshot is kept
    pub fn set_update_error(&self, err: UpdateFailed) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.record_failure(&err, false);
        self.notify_listeners();
    }

    /// Register a callback run after every refresh. The first listener
    /// starts the periodic timer.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.insert(id, Arc::new(callback));

        if !self.inner.shut_down.load(Ordering::SeqCst) && !self.status().polling_stopped {
            self.start_timer();
        }
        id
    }

    /// Remove a callback. Removing the last one stops the timer.
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(&id);
        if self.inner.listeners.is_empty() {
            self.stop_timer();
        }
    }

    /// Stop polling and drop every listener. A refresh still in flight
    /// completes silently.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(name = %self.inner.name, "Shutting down coordinator");
        self.stop_timer();
        self.inner.debouncer.shutdown();
        self.inner.listeners.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Fetch once; must be called with `refresh_lock` held. Returns the
    /// failure, if any.
    ///
    /// During the first refresh failures are neither logged nor passed to
    /// the hooks; they are returned to the setup code instead.
    #[instrument(skip(self), fields(name = %self.inner.name))]
    async fn run_refresh(&self, initial: bool) -> Option<UpdateFailed> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return None;
        }

        let result = self.inner.source.fetch().await;
        self.inner.refresh_count.fetch_add(1, Ordering::SeqCst);

        if self.inner.shut_down.load(Ordering::SeqCst) {
            debug!("Coordinator shut down during refresh, discarding result");
            return None;
        }

        let failure = match result {
            Ok(data) => {
                self.inner.data.send_replace(Some(Arc::new(data)));
                self.record_success();
                None
            }
            Err(err) => {
                self.record_failure(&err, initial);
                Some(err)
            }
        };

        self.notify_listeners();
        failure
    }

    fn record_success(&self) {
        let resume = {
            let mut status = self.status();
            if !status.last_update_success {
                info!("Fetching {} data recovered", self.inner.name);
            }
            status.last_update_success = true;
            status.last_error = None;
            std::mem::replace(&mut status.polling_stopped, false)
        };

        if resume && !self.inner.listeners.is_empty() {
            self.start_timer();
        }
    }

    fn record_failure(&self, err: &UpdateFailed, initial: bool) {
        {
            let mut status = self.status();
            if !initial {
                if status.last_update_success {
                    error!("Error fetching {} data: {}", self.inner.name, err);
                } else {
                    debug!("Error fetching {} data: {}", self.inner.name, err);
                }
            }
            status.last_update_success = false;
            status.last_error = Some(err.clone());
            if !err.keeps_polling() {
                status.polling_stopped = true;
            }
        }

        match err.kind() {
            ErrorKind::Transient => {}
            ErrorKind::AuthRequired => {
                self.stop_timer();
                if initial {
                    return;
                }
                warn!("Authentication failed for {}, polling stopped", self.inner.name);
                if let Some(hook) = &self.inner.on_auth_failed {
                    hook(err);
                }
            }
            ErrorKind::Fatal => {
                self.stop_timer();
                if initial {
                    return;
                }
                warn!("Unrecoverable error for {}, polling stopped", self.inner.name);
                if let Some(hook) = &self.inner.on_fatal {
                    hook(err);
                }
            }
        }
    }

    fn notify_listeners(&self) {
        // Collected first so a callback may add or remove listeners
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    fn start_timer(&self) {
        let Some(interval) = self.inner.update_interval else {
            return;
        };
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        *timer = Some(cancel.clone());
        debug!(name = %self.inner.name, ?interval, "Starting refresh timer");

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(poll_task(weak, interval, cancel));
    }

    fn stop_timer(&self) {
        if let Some(cancel) = lock(&self.inner.timer).take() {
            debug!(name = %self.inner.name, "Stopping refresh timer");
            cancel.cancel();
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.inner.status)
    }
}

async fn poll_task<S: DataSource>(
    weak: Weak<Inner<S>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = weak.upgrade() else { break };
                let coordinator = DataUpdateCoordinator { inner };
                coordinator.tick().await;
            }
        }
    }
}

impl<S: DataSource> DataUpdateCoordinator<S> {
    /// Scheduled refresh; skipped outright if one is already running
    async fn tick(&self) {
        let Ok(_guard) = self.inner.refresh_lock.try_lock() else {
            debug!(name = %self.inner.name, "Refresh in flight, skipping tick");
            return;
        };
        self.run_refresh(false).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Scripted source: pops outcomes front to back, repeating the last one
    struct Scripted {
        outcomes: Mutex<Vec<Result<u32, UpdateFailed>>>,
        calls: AtomicUsize,
        /// When set, every fetch takes one permit first
        gate: Option<Arc<Semaphore>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<u32, UpdateFailed>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl DataSource for Scripted {
        type Data = u32;

        async fn fetch(&self) -> Result<u32, UpdateFailed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            }
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot_and_notifies_once() {
        let coordinator = DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(1), Ok(2)])).build();
        let (notified, listener) = counter();
        coordinator.add_listener(listener);

        assert!(coordinator.data().is_none());
        coordinator.refresh().await.unwrap();
        assert_eq!(coordinator.data().as_deref(), Some(&1));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        coordinator.refresh().await.unwrap();
        assert_eq!(coordinator.data().as_deref(), Some(&2));
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_snapshot() {
        let coordinator = DataUpdateCoordinator::builder(
            "test",
            Scripted::new(vec![Ok(42), Err(UpdateFailed::transient("timeout")), Ok(41)]),
        )
        .build();
        let (notified, listener) = counter();
        coordinator.add_listener(listener);

        coordinator.refresh().await.unwrap();
        let err = coordinator.refresh().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!coordinator.last_update_success());
        assert_eq!(coordinator.data().as_deref(), Some(&42));
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        coordinator.refresh().await.unwrap();
        assert!(coordinator.last_update_success());
        assert!(coordinator.last_error().is_none());
        assert_eq!(coordinator.data().as_deref(), Some(&41));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_is_coalesced() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(1)]).gated(gate.clone())).build();

        let first = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh().await }
        });
        while coordinator.source().calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh().await }
        });
        tokio::task::yield_now().await;

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_follows_listeners() {
        let coordinator = DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(1)]))
            .update_interval(Duration::from_secs(15))
            .build();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 0);

        let (_, listener) = counter();
        let id = coordinator.add_listener(listener);
        assert!(coordinator.is_polling());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);

        coordinator.remove_listener(id);
        assert!(!coordinator.is_polling());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_stops_polling_and_calls_hook() {
        let reauth = Arc::new(AtomicUsize::new(0));
        let hook_count = reauth.clone();
        let coordinator = DataUpdateCoordinator::builder(
            "test",
            Scripted::new(vec![Ok(1), Err(UpdateFailed::auth("token expired"))]),
        )
        .update_interval(Duration::from_secs(15))
        .on_auth_failed(move |_| {
            hook_count.fetch_add(1, Ordering::SeqCst);
        })
        .build();

        let (_, listener) = counter();
        coordinator.add_listener(listener);
        coordinator.refresh().await.unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(reauth.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_polling());
        assert!(coordinator.last_error().unwrap().is_auth());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.data().as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_stops_polling_and_calls_hook() {
        let fatal = Arc::new(Mutex::new(Vec::new()));
        let seen = fatal.clone();
        let coordinator = DataUpdateCoordinator::builder(
            "test",
            Scripted::new(vec![Ok(1), Err(UpdateFailed::fatal("firmware too old"))]),
        )
        .update_interval(Duration::from_secs(15))
        .on_fatal(move |err| seen.lock().unwrap().push(err.message().to_string()))
        .build();

        let (notified, listener) = counter();
        coordinator.add_listener(listener);
        coordinator.first_refresh().await.unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(*fatal.lock().unwrap(), vec!["firmware too old".to_string()]);
        assert!(!coordinator.is_polling());
        assert_eq!(coordinator.last_error().unwrap().kind(), ErrorKind::Fatal);
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);
        assert_eq!(fatal.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_first_refresh_skips_hook() {
        let fatal = Arc::new(AtomicUsize::new(0));
        let hook_count = fatal.clone();
        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Err(UpdateFailed::fatal("bad model"))]))
                .on_fatal(move |_| {
                    hook_count.fetch_add(1, Ordering::SeqCst);
                })
                .build();
        assert_eq!(
            coordinator.first_refresh().await,
            Err(SetupError::Failed("bad model".into()))
        );
        assert_eq!(fatal.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_refresh_after_shutdown_is_not_ready() {
        let coordinator = DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(1)])).build();
        coordinator.shutdown();

        assert!(matches!(
            coordinator.first_refresh().await,
            Err(SetupError::NotReady(_))
        ));
        assert!(coordinator.data().is_none());
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_first_refresh_is_not_ready() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(5)]).gated(gate.clone())).build();

        let setup = tokio::spawn({
            let c = coordinator.clone();
            async move { c.first_refresh().await }
        });
        while coordinator.source().calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        coordinator.shutdown();
        gate.add_permits(1);

        assert!(matches!(setup.await.unwrap(), Err(SetupError::NotReady(_))));
        assert!(coordinator.data().is_none());
    }

    #[tokio::test]
    async fn test_first_refresh_maps_errors() {
        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Err(UpdateFailed::transient("offline"))]))
                .build();
        assert_eq!(
            coordinator.first_refresh().await,
            Err(SetupError::NotReady("offline".into()))
        );
        assert!(coordinator.data().is_none());

        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Err(UpdateFailed::auth("denied"))]))
                .build();
        assert_eq!(
            coordinator.first_refresh().await,
            Err(SetupError::AuthFailed("denied".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_refresh_is_debounced() {
        let coordinator = DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(1)])).build();

        for _ in 0..4 {
            coordinator.request_refresh().await;
        }
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(REQUEST_REFRESH_DEFAULT_COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pushed_data_and_errors() {
        let coordinator = DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(0)])).build();
        let (notified, listener) = counter();
        coordinator.add_listener(listener);
        let mut rx = coordinator.subscribe_data();

        coordinator.set_updated_data(7);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_deref(), Some(&7));

        coordinator.set_update_error(UpdateFailed::transient("push channel dropped"));
        assert!(!coordinator.last_update_success());
        assert_eq!(coordinator.data().as_deref(), Some(&7));
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.source().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_refresh_notifies_nobody() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator =
            DataUpdateCoordinator::builder("test", Scripted::new(vec![Ok(5)]).gated(gate.clone())).build();
        let (notified, listener) = counter();
        coordinator.add_listener(listener);

        let refresh = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh().await }
        });
        while coordinator.source().calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown();
        gate.add_permits(1);
        refresh.await.unwrap().unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.listener_count(), 0);
        assert!(coordinator.data().is_none());
    }
}
