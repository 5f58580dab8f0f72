//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-connection polling coordinator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One coordinator owns one device connection: it performs the mandatory
//! first refresh, schedules the periodic poll, caches the last good snapshot
//! and fans every outcome out to subscribed listeners.
//!
//! Fetches for a connection never overlap. A tick that comes due while the
//! previous fetch is still running is skipped rather than queued.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use indevolt_catalog::{keys_for, RegisterKey};
use indevolt_common::config::DeviceConfig;
use indevolt_logging::{log_fetch_failure, poll_debug, poll_info, LogContext};
use indevolt_metrics::{FetchOutcome, PollMetrics};
use indevolt_net::{DeviceTransport, ErrorKind, FetchError};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CoordinatorError;
use crate::listener::{CoordinatorUpdate, ListenerId, ListenerSet, UpdateListener};
use crate::snapshot::Snapshot;
use crate::timer::PollTimer;

/// Failure streak length at which fetch failures are logged as errors.
pub const DEFAULT_FAILURE_LOG_THRESHOLD: u32 = 3;

/// Static parameters of a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Device host, used for log context only.
    pub host: String,
    /// Full key list requested on every fetch, in catalog order.
    pub keys: Vec<RegisterKey>,
    pub poll_interval: Duration,
    pub failure_log_threshold: u32,
}

impl CoordinatorSettings {
    pub fn new(keys: Vec<RegisterKey>, poll_interval: Duration) -> Self {
        Self {
            host: String::new(),
            keys,
            poll_interval,
            failure_log_threshold: DEFAULT_FAILURE_LOG_THRESHOLD,
        }
    }

    /// Settings for a configured device: the generation's full catalog, the
    /// configured scan interval and log threshold.
    pub fn for_device(config: &DeviceConfig) -> Self {
        Self {
            host: config.host.clone(),
            keys: keys_for(config.generation()),
            poll_interval: config.scan_interval,
            failure_log_threshold: config.failure_log_threshold,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_failure_log_threshold(mut self, threshold: u32) -> Self {
        self.failure_log_threshold = threshold;
        self
    }
}

/// Lifecycle of a coordinator. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Active,
    Stopped,
}

struct Core {
    state: CoordinatorState,
    snapshot: Option<Arc<Snapshot>>,
    consecutive_failures: u32,
    last_failure: Option<FetchError>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    connection_id: String,
    settings: CoordinatorSettings,
    transport: Arc<dyn DeviceTransport>,
    metrics: Option<PollMetrics>,
    core: Mutex<Core>,
    listeners: ListenerSet,
    /// Held while an update is applied and delivered, and while a new
    /// listener gets its catch-up, so every listener sees snapshots in order.
    /// Reentrant so callbacks may (un)subscribe.
    delivery: ReentrantMutex<()>,
    in_flight: AtomicBool,
    ticks: AtomicU64,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Inner {
    fn log_context(&self, tick: u64) -> LogContext<'_> {
        LogContext::new()
            .with_connection(&self.connection_id)
            .with_host(&self.settings.host)
            .with_tick(tick)
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let started = Instant::now();
        let result = self.transport.fetch(&self.settings.keys).await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => FetchOutcome::Success,
                Err(err) => outcome_for(err.kind()),
            };
            metrics.record_fetch(
                &self.connection_id,
                outcome,
                started.elapsed().as_secs_f64(),
            );
        }
        result.map(|raw| Snapshot::from_raw(raw, self.settings.keys.len()))
    }

    fn record_snapshot(&self, snapshot: &Snapshot) {
        if let Some(metrics) = &self.metrics {
            metrics.record_snapshot(
                &self.connection_id,
                snapshot.len(),
                snapshot.captured_at().timestamp_millis() as f64 / 1000.0,
            );
            metrics.set_consecutive_failures(&self.connection_id, 0);
        }
    }
}

fn outcome_for(kind: ErrorKind) -> FetchOutcome {
    match kind {
        ErrorKind::Timeout => FetchOutcome::Timeout,
        ErrorKind::NetworkError => FetchOutcome::NetworkError,
        ErrorKind::ProtocolError => FetchOutcome::ProtocolError,
    }
}

/// Guard marking a fetch as in flight; cleared on drop, including when the
/// owning future is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheaply cloneable handle to a connection's coordinator.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for PollingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingCoordinator")
            .field("connection_id", &self.inner.connection_id)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

impl PollingCoordinator {
    pub fn new(
        connection_id: impl Into<String>,
        settings: CoordinatorSettings,
        transport: Arc<dyn DeviceTransport>,
        metrics: Option<PollMetrics>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connection_id: connection_id.into(),
                settings,
                transport,
                metrics,
                core: Mutex::new(Core {
                    state: CoordinatorState::Uninitialized,
                    snapshot: None,
                    consecutive_failures: 0,
                    last_failure: None,
                    timer: None,
                }),
                listeners: ListenerSet::default(),
                delivery: ReentrantMutex::new(()),
                in_flight: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                shutdown,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    /// Perform the first refresh and, on success, begin periodic polling.
    ///
    /// Any fetch failure is reported as [`CoordinatorError::NotReady`]; the
    /// coordinator then stays `Uninitialized` and schedules nothing. A zero
    /// poll interval is rejected before anything is fetched.
    pub async fn start(&self) -> Result<Arc<Snapshot>, CoordinatorError> {
        match self.inner.core.lock().state {
            CoordinatorState::Active => return Err(CoordinatorError::AlreadyStarted),
            CoordinatorState::Stopped => return Err(CoordinatorError::Stopped),
            CoordinatorState::Uninitialized => {}
        }
        if self.inner.settings.poll_interval.is_zero() {
            return Err(CoordinatorError::InvalidInterval);
        }
        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            return Err(CoordinatorError::StartInProgress);
        };

        let ctx = self.inner.log_context(0);
        poll_debug!(
            context = ctx,
            "first refresh of {} registers",
            self.inner.settings.keys.len()
        );
        let result = self.inner.fetch_snapshot().await;

        let mut core = self.inner.core.lock();
        if core.state == CoordinatorState::Stopped {
            drop(core);
            poll_debug!(context = ctx, "shut down during first refresh; result discarded");
            return Err(CoordinatorError::Stopped);
        }
        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                core.snapshot = Some(snapshot.clone());
                core.consecutive_failures = 0;
                core.state = CoordinatorState::Active;
                core.timer = Some(self.spawn_timer());
                drop(core);

                if let Some(metrics) = &self.inner.metrics {
                    metrics.connection_started();
                }
                self.inner.record_snapshot(&snapshot);
                poll_info!(
                    context = ctx,
                    "connection ready; {} of {} registers reported, polling every {:?}",
                    snapshot.len(),
                    snapshot.requested(),
                    self.inner.settings.poll_interval
                );
                Ok(snapshot)
            }
            Err(err) => {
                core.last_failure = Some(err.clone());
                drop(core);
                warn!(
                    connection = %self.inner.connection_id,
                    host = %self.inner.settings.host,
                    kind = %err.kind(),
                    error = %err,
                    "first refresh failed; connection not ready"
                );
                Err(CoordinatorError::NotReady(err))
            }
        }
    }

    /// Run one poll cycle. Returns `None` when the coordinator is not active,
    /// when a previous fetch is still in flight, or when shutdown raced the
    /// fetch and its result was discarded.
    pub async fn tick(&self) -> Option<CoordinatorUpdate> {
        if self.inner.core.lock().state != CoordinatorState::Active {
            return None;
        }
        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            debug!(
                connection = %self.inner.connection_id,
                "previous fetch still in flight; skipping tick"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics.inc_skipped_tick();
            }
            return None;
        };

        let seq = self.inner.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = self.inner.log_context(seq);
        let result = self.inner.fetch_snapshot().await;

        let _delivery = self.inner.delivery.lock();
        let outcome = {
            let mut core = self.inner.core.lock();
            if core.state != CoordinatorState::Active {
                None
            } else {
                let previous_failures = core.consecutive_failures;
                match result {
                    Ok(snapshot) => {
                        let snapshot = Arc::new(snapshot);
                        core.snapshot = Some(snapshot.clone());
                        core.consecutive_failures = 0;
                        Some((CoordinatorUpdate::Refreshed(snapshot), previous_failures))
                    }
                    Err(error) => {
                        core.consecutive_failures = previous_failures.saturating_add(1);
                        core.last_failure = Some(error.clone());
                        core.snapshot.clone().map(|stale| {
                            (
                                CoordinatorUpdate::Failed {
                                    error,
                                    stale,
                                    consecutive_failures: core.consecutive_failures,
                                },
                                previous_failures,
                            )
                        })
                    }
                }
            }
        };
        let Some((update, previous_failures)) = outcome else {
            poll_debug!(context = ctx, "coordinator stopped during fetch; result discarded");
            return None;
        };

        match &update {
            CoordinatorUpdate::Refreshed(snapshot) => {
                if previous_failures > 0 {
                    poll_info!(
                        context = ctx,
                        "device reachable again after {} failed polls",
                        previous_failures
                    );
                }
                poll_debug!(
                    context = ctx,
                    "snapshot refreshed with {} registers",
                    snapshot.len()
                );
                self.inner.record_snapshot(snapshot);
            }
            CoordinatorUpdate::Failed {
                error,
                consecutive_failures,
                ..
            } => {
                log_fetch_failure(
                    &ctx,
                    error.kind().as_str(),
                    error,
                    *consecutive_failures,
                    self.inner.settings.failure_log_threshold,
                );
                if let Some(metrics) = &self.inner.metrics {
                    metrics.set_consecutive_failures(
                        &self.inner.connection_id,
                        *consecutive_failures,
                    );
                }
            }
        }

        self.inner.listeners.notify(&update);
        Some(update)
    }

    /// Register a listener. When the coordinator is already active the
    /// listener immediately receives the current snapshot once.
    pub fn subscribe(&self, listener: Arc<dyn UpdateListener>) -> ListenerId {
        let _delivery = self.inner.delivery.lock();
        let id = self.inner.listeners.insert(listener.clone());
        let catch_up = {
            let core = self.inner.core.lock();
            match core.state {
                CoordinatorState::Active => core.snapshot.clone(),
                _ => None,
            }
        };
        if let Some(snapshot) = catch_up {
            listener.on_update(&CoordinatorUpdate::Refreshed(snapshot));
        }
        id
    }

    /// Remove a listener. Returns `false` when the id was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Latest successful snapshot, possibly stale.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.core.lock().snapshot.clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.core.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.core.lock().consecutive_failures
    }

    pub fn last_failure(&self) -> Option<FetchError> {
        self.inner.core.lock().last_failure.clone()
    }

    /// Stop polling and release the transport. Idempotent.
    ///
    /// A pending wait is cancelled immediately. A fetch still in flight is
    /// abandoned and its result never reaches listeners. An update already
    /// being delivered finishes first, so none arrives after this returns.
    pub async fn shutdown(&self) {
        let (previous, timer) = {
            let mut core = self.inner.core.lock();
            let previous = core.state;
            core.state = CoordinatorState::Stopped;
            (previous, core.timer.take())
        };
        if previous == CoordinatorState::Stopped {
            return;
        }
        drop(self.inner.delivery.lock());

        self.inner.shutdown.send_replace(true);
        if let Some(handle) = timer {
            handle.abort();
            let _ = handle.await;
        }
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.transport.close().await;
        }
        if let Some(metrics) = &self.inner.metrics {
            if previous == CoordinatorState::Active {
                metrics.connection_stopped(&self.inner.connection_id);
            }
        }
        let ctx = self.inner.log_context(self.inner.ticks.load(Ordering::Relaxed));
        poll_info!(context = ctx, "coordinator stopped");
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.settings.poll_interval;
        tokio::spawn(async move {
            let mut timer = PollTimer::new(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = timer.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let coordinator = PollingCoordinator { inner };
                        let _ = coordinator.tick().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indevolt_catalog::DeviceModel;
    use indevolt_net::RegisterValues;
    use serde_json::json;

    struct Fixed(RegisterValues);

    #[async_trait]
    impl DeviceTransport for Fixed {
        async fn fetch(&self, _keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn fixed() -> Arc<dyn DeviceTransport> {
        let mut values = RegisterValues::new();
        values.insert(RegisterKey::from("1664"), json!(120));
        Arc::new(Fixed(values))
    }

    #[test]
    fn device_settings_use_generation_catalog() {
        let config = DeviceConfig::new("10.0.0.2", DeviceModel::SolidFlex2000);
        let settings = CoordinatorSettings::for_device(&config);
        assert_eq!(settings.host, "10.0.0.2");
        assert_eq!(settings.keys, keys_for(config.generation()));
        assert_eq!(settings.poll_interval, config.scan_interval);
        assert_eq!(settings.failure_log_threshold, DEFAULT_FAILURE_LOG_THRESHOLD);
    }

    #[tokio::test]
    async fn tick_before_start_is_a_no_op() {
        let coordinator = PollingCoordinator::new(
            "entry-a",
            CoordinatorSettings::new(vec!["1664".into()], Duration::from_secs(30)),
            fixed(),
            None,
        );
        assert!(coordinator.tick().await.is_none());
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert!(coordinator.current_snapshot().is_none());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let coordinator = PollingCoordinator::new(
            "entry-a",
            CoordinatorSettings::new(vec!["1664".into()], Duration::from_secs(30)),
            fixed(),
            None,
        );
        coordinator.start().await.unwrap();
        assert_eq!(
            coordinator.start().await.unwrap_err(),
            CoordinatorError::AlreadyStarted
        );
        coordinator.shutdown().await;
        assert_eq!(
            coordinator.start().await.unwrap_err(),
            CoordinatorError::Stopped
        );
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = InFlight::acquire(&flag).unwrap();
            assert!(InFlight::acquire(&flag).is_none());
        }
        assert!(InFlight::acquire(&flag).is_some());
    }
}
