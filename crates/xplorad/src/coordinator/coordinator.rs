use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::time::Duration;

use futures::future::join_all;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::alert::Alert;
use super::alert::AlertKind;
use super::alert::AlertSink;
use super::backoff::Backoff;
use super::CommandError;
use super::CoordinatorError;
use crate::geo::Geocoder;
use crate::remote::FailureClass;
use crate::remote::RemoteError;
use crate::remote::WatchService;
use crate::watch::Availability;
use crate::watch::ChangeSet;
use crate::watch::CommandField;
use crate::watch::HomeFix;
use crate::watch::Observation;
use crate::watch::Position;
use crate::watch::WatchId;
use crate::watch::WatchObserver;
use crate::watch::WatchSnapshot;
use crate::watch::WatchState;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Reference point for home/away.
    pub home: Position,
    /// Inclusive home radius in meters.
    pub home_radius_m: f64,
    pub poll_interval: Duration,
    /// Upper bound for every fetch, geocode and command call.
    pub request_timeout: Duration,
    /// Consecutive transient failures before a degraded alert is raised.
    pub failure_threshold: u32,
    pub backoff: Backoff,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            home: Position::new(0.0, 0.0),
            home_radius_m: 100.0,
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            failure_threshold: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Polling health of one watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchHealth {
    Healthy,
    /// Transient failures; a retry timer fires `retry_in` after the last one.
    Retrying { failures: u32, retry_in: Duration },
    /// Transient failures with no retry pending, e.g. while polling is
    /// stopped. The next refresh is whatever the caller triggers.
    Failing { failures: u32 },
    /// Persistent failure; polling is suspended until reconfiguration.
    Unavailable { reason: String },
}

/// Result of one refresh of one watch.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// First accepted state for this watch.
    Created,
    Updated(ChangeSet),
    Unchanged,
    /// Not polled: unavailable, or a retry timer is pending.
    Skipped,
    Failed(FailureClass),
    /// The coordinator was stopped or the watch unregistered mid-flight.
    Discarded,
}

#[derive(Debug, Default)]
struct WatchRecord {
    state: Option<WatchState>,
    /// Consecutive transient failures.
    failures: u32,
    degraded_alerted: bool,
    /// Delay of the armed retry timer, if any.
    retry_in: Option<Duration>,
    unavailable: Option<String>,
}

impl WatchRecord {
    fn availability(&self) -> Availability {
        if self.unavailable.is_some() {
            Availability::Unavailable
        } else {
            Availability::Available
        }
    }

    fn snapshot(&self, id: &WatchId) -> WatchSnapshot {
        WatchSnapshot {
            id: id.clone(),
            state: self.state.clone(),
            availability: self.availability(),
        }
    }

    fn health(&self) -> WatchHealth {
        if let Some(reason) = &self.unavailable {
            return WatchHealth::Unavailable {
                reason: reason.clone(),
            };
        }
        match (self.failures, self.retry_in) {
            (0, _) => WatchHealth::Healthy,
            (failures, Some(retry_in)) => WatchHealth::Retrying { failures, retry_in },
            (failures, None) => WatchHealth::Failing { failures },
        }
    }
}

struct WatchSlot {
    id: WatchId,
    /// Serializes poll results against optimistic command updates.
    record: Mutex<WatchRecord>,
    /// Held for a whole refresh so fetches of one watch never overlap and
    /// results are applied in request order.
    fetch_gate: Mutex<()>,
    observers: std::sync::Mutex<Vec<Arc<dyn WatchObserver>>>,
    retry_armed: AtomicBool,
    registered: AtomicBool,
}

impl WatchSlot {
    fn new(id: WatchId) -> Self {
        Self {
            id,
            record: Mutex::new(WatchRecord::default()),
            fetch_gate: Mutex::new(()),
            observers: std::sync::Mutex::new(Vec::new()),
            retry_armed: AtomicBool::new(false),
            registered: AtomicBool::new(true),
        }
    }

    /// Must be called with `record` held so observers see updates in order.
    fn notify(&self, record: &WatchRecord) {
        let snapshot = record.snapshot(&self.id);
        let observers = self
            .observers
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default();
        debug!(
            "[{}] notifying {} observer(s), revision {}",
            self.id,
            observers.len(),
            snapshot.revision()
        );
        for observer in observers {
            observer.on_state_change(&snapshot);
        }
    }
}

enum Lifecycle {
    Idle,
    Running {
        cancel: CancellationToken,
        _poll_task: JoinHandle<()>,
    },
    Stopped,
}

struct Inner {
    settings: CoordinatorSettings,
    service: Arc<dyn WatchService>,
    geocoder: Arc<dyn Geocoder>,
    alerts: Arc<dyn AlertSink>,
    watches: RwLock<BTreeMap<WatchId, Arc<WatchSlot>>>,
    lifecycle: std::sync::Mutex<Lifecycle>,
}

/// Watch-state synchronization coordinator
///
/// Owns the only mutable copy of every [`WatchState`], polls the remote
/// service on a schedule, and pushes changes to subscribed observers. Cloning
/// is cheap and yields another handle to the same coordinator.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        service: Arc<dyn WatchService>,
        geocoder: Arc<dyn Geocoder>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                service,
                geocoder,
                alerts,
                watches: RwLock::new(BTreeMap::new()),
                lifecycle: std::sync::Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    /// Add a watch. Returns false if it was already registered.
    pub fn register(&self, id: WatchId) -> bool {
        let mut watches = self
            .inner
            .watches
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if watches.contains_key(&id) {
            return false;
        }
        info!("[{}] Watch registered", id);
        watches.insert(id.clone(), Arc::new(WatchSlot::new(id)));
        true
    }

    /// Remove a watch, its state and its observers.
    ///
    /// Observers receive a final unavailable snapshot. Results of calls still
    /// in flight for this watch are discarded.
    pub async fn unregister(&self, id: &WatchId) -> bool {
        let slot = {
            let mut watches = self
                .inner
                .watches
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            watches.remove(id)
        };
        let Some(slot) = slot else {
            return false;
        };

        slot.registered.store(false, Ordering::SeqCst);
        let mut record = slot.record.lock().await;
        record.state = None;
        record.unavailable = Some("watch removed from configuration".to_string());
        slot.notify(&record);
        if let Ok(mut observers) = slot.observers.lock() {
            observers.clear();
        }
        info!("[{}] Watch unregistered", id);
        true
    }

    pub fn watch_ids(&self) -> Vec<WatchId> {
        self.inner
            .watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn slot(&self, id: &WatchId) -> Option<Arc<WatchSlot>> {
        self.inner
            .watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn slots(&self) -> Vec<Arc<WatchSlot>> {
        self.inner
            .watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn snapshot(&self, id: &WatchId) -> Option<WatchSnapshot> {
        let slot = self.slot(id)?;
        let record = slot.record.lock().await;
        Some(record.snapshot(id))
    }

    pub async fn health(&self, id: &WatchId) -> Option<WatchHealth> {
        let slot = self.slot(id)?;
        let record = slot.record.lock().await;
        Some(record.health())
    }

    /// Attach an observer to one watch.
    ///
    /// If the watch already has state, or is unavailable, the observer is
    /// brought up to date immediately; afterwards it is only called on changes.
    pub async fn subscribe(
        &self,
        id: &WatchId,
        observer: Arc<dyn WatchObserver>,
    ) -> Result<(), CoordinatorError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| CoordinatorError::UnknownWatch(id.clone()))?;
        let record = slot.record.lock().await;
        if let Ok(mut observers) = slot.observers.lock() {
            observers.push(observer.clone());
        }
        if record.state.is_some() || record.unavailable.is_some() {
            observer.on_state_change(&record.snapshot(id));
        }
        Ok(())
    }

    /// A handle entities use to send commands without owning the coordinator.
    pub fn command_relay(&self) -> CommandRelay {
        CommandRelay {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running { .. })
    }

    /// Start periodic polling. Calling it while running does nothing.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        if self.inner.watches.read().map(|w| w.is_empty()).unwrap_or(true) {
            return Err(CoordinatorError::NoWatches);
        }

        let mut lifecycle = self.lifecycle();
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            debug!("Coordinator already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let coordinator = self.clone();
        let token = cancel.clone();
        let poll_task = tokio::spawn(async move {
            coordinator.poll_loop(token).await;
        });

        *lifecycle = Lifecycle::Running {
            cancel,
            _poll_task: poll_task,
        };
        info!(
            "Coordinator started, polling every {:?}",
            self.inner.settings.poll_interval
        );
        Ok(())
    }

    /// Cancel the poll loop and every pending retry timer.
    ///
    /// Calls already in flight may finish; their results are discarded.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { cancel, .. } => {
                cancel.cancel();
                info!("Coordinator stopped");
            }
            Lifecycle::Idle => *lifecycle = Lifecycle::Idle,
            Lifecycle::Stopped => {}
        }
    }

    async fn poll_loop(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Poll loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let outcomes = self.refresh_all().await;
                    let changed = outcomes
                        .values()
                        .filter(|o| matches!(o, RefreshOutcome::Created | RefreshOutcome::Updated(_)))
                        .count();
                    debug!("Poll cycle done: {} watch(es), {} changed", outcomes.len(), changed);
                }
            }
        }
    }

    /// Refresh every watch concurrently.
    ///
    /// Watches waiting on a retry timer are skipped; one watch failing never
    /// affects the others.
    pub async fn refresh_all(&self) -> BTreeMap<WatchId, RefreshOutcome> {
        let slots = self.slots();
        let refreshes = slots.iter().map(|slot| async move {
            let outcome = if slot.retry_armed.load(Ordering::SeqCst) {
                RefreshOutcome::Skipped
            } else {
                self.refresh_slot(slot).await
            };
            (slot.id.clone(), outcome)
        });
        join_all(refreshes).await.into_iter().collect()
    }

    pub async fn refresh_one(&self, id: &WatchId) -> Result<RefreshOutcome, CoordinatorError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| CoordinatorError::UnknownWatch(id.clone()))?;
        Ok(self.refresh_slot(&slot).await)
    }

    fn discards_results(&self, slot: &WatchSlot) -> bool {
        !slot.registered.load(Ordering::SeqCst) || matches!(*self.lifecycle(), Lifecycle::Stopped)
    }

    async fn refresh_slot(&self, slot: &Arc<WatchSlot>) -> RefreshOutcome {
        let _gate = slot.fetch_gate.lock().await;
        if slot.record.lock().await.unavailable.is_some() {
            return RefreshOutcome::Skipped;
        }

        let settings = &self.inner.settings;
        let fetched = timeout(settings.request_timeout, self.inner.service.fetch_state(&slot.id))
            .await
            .unwrap_or(Err(RemoteError::Timeout(settings.request_timeout)));

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => return self.record_failure(slot, e).await,
        };

        let observation = Observation::from(raw);
        let home = self.resolve_home(&slot.id, &observation).await;
        let fetched_at = OffsetDateTime::now_utc();

        let mut record = slot.record.lock().await;
        if self.discards_results(slot) {
            debug!("[{}] Discarding poll result", slot.id);
            return RefreshOutcome::Discarded;
        }
        if record.unavailable.is_some() {
            return RefreshOutcome::Skipped;
        }

        if record.failures > 0 {
            info!(
                "[{}] Recovered after {} failed poll(s)",
                slot.id, record.failures
            );
        }
        record.failures = 0;
        record.degraded_alerted = false;
        record.retry_in = None;

        let next = observation.resolve(
            home,
            record.state.as_ref(),
            settings.home_radius_m,
            fetched_at,
        );

        let outcome = match record.state.as_mut() {
            Some(state) => {
                let changes = state.apply(next);
                if changes.is_empty() {
                    RefreshOutcome::Unchanged
                } else {
                    debug!(
                        "[{}] Revision {}: {}",
                        slot.id, state.revision, changes
                    );
                    RefreshOutcome::Updated(changes)
                }
            }
            None => {
                let mut state = next;
                state.revision = 1;
                record.state = Some(state);
                info!("[{}] First state received", slot.id);
                RefreshOutcome::Created
            }
        };

        if matches!(outcome, RefreshOutcome::Created | RefreshOutcome::Updated(_)) {
            slot.notify(&record);
        }
        outcome
    }

    async fn resolve_home(&self, id: &WatchId, observation: &Observation) -> HomeFix {
        if let Some(is_home) = observation.reported_home {
            return HomeFix::Reported(is_home);
        }
        let Some(position) = observation.position else {
            return HomeFix::Unresolved;
        };

        let home = self.inner.settings.home;
        let lookup = self.inner.geocoder.distance_meters(
            position.latitude,
            position.longitude,
            home.latitude,
            home.longitude,
        );

        match timeout(self.inner.settings.request_timeout, lookup).await {
            Ok(Ok(distance)) if distance.is_finite() && distance >= 0.0 => {
                HomeFix::Measured(distance)
            }
            Ok(Ok(distance)) => {
                warn!(
                    "[{}] Geocoder returned invalid distance {}, keeping previous home state",
                    id, distance
                );
                HomeFix::Unresolved
            }
            Ok(Err(e)) => {
                warn!(
                    "[{}] Geocoding failed, keeping previous home state: {}",
                    id, e
                );
                HomeFix::Unresolved
            }
            Err(_) => {
                warn!(
                    "[{}] Geocoding timed out, keeping previous home state",
                    id
                );
                HomeFix::Unresolved
            }
        }
    }

    async fn record_failure(&self, slot: &Arc<WatchSlot>, err: RemoteError) -> RefreshOutcome {
        let mut record = slot.record.lock().await;
        if self.discards_results(slot) {
            return RefreshOutcome::Discarded;
        }
        if record.unavailable.is_some() {
            return RefreshOutcome::Skipped;
        }

        match err.class() {
            FailureClass::Transient => {
                let delay = self
                    .inner
                    .settings
                    .backoff
                    .delay_for_attempt(record.failures);
                record.failures += 1;
                record.retry_in = self.schedule_retry(slot, delay).then_some(delay);
                match record.retry_in {
                    Some(delay) => warn!(
                        "[{}] Poll failed ({} in a row), retrying in {:?}: {}",
                        slot.id, record.failures, delay, err
                    ),
                    None => warn!(
                        "[{}] Poll failed ({} in a row), polling is not running: {}",
                        slot.id, record.failures, err
                    ),
                }

                if record.failures >= self.inner.settings.failure_threshold.max(1)
                    && !record.degraded_alerted
                {
                    record.degraded_alerted = true;
                    self.inner.alerts.raise(Alert {
                        watch: slot.id.clone(),
                        kind: AlertKind::Degraded,
                        message: format!(
                            "{} consecutive poll failures, last: {}",
                            record.failures, err
                        ),
                    });
                }

                RefreshOutcome::Failed(FailureClass::Transient)
            }
            FailureClass::Persistent => {
                error!(
                    "[{}] Poll failed permanently, suspending until reconfigured: {}",
                    slot.id, err
                );
                record.unavailable = Some(err.to_string());
                record.failures = 0;
                record.retry_in = None;
                self.inner.alerts.raise(Alert {
                    watch: slot.id.clone(),
                    kind: AlertKind::Unavailable,
                    message: err.to_string(),
                });
                slot.notify(&record);
                RefreshOutcome::Failed(FailureClass::Persistent)
            }
        }
    }

    /// Arm a one-shot retry timer, if the coordinator is running and none is
    /// pending for this watch. Returns whether a retry is pending afterwards.
    fn schedule_retry(&self, slot: &Arc<WatchSlot>, delay: Duration) -> bool {
        let cancel = match &*self.lifecycle() {
            Lifecycle::Running { cancel, .. } => cancel.clone(),
            _ => return false,
        };
        if slot.retry_armed.swap(true, Ordering::SeqCst) {
            return true;
        }

        let coordinator = self.clone();
        let slot = Arc::clone(slot);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    slot.retry_armed.store(false, Ordering::SeqCst);
                    slot.record.lock().await.retry_in = None;
                }
                _ = tokio::time::sleep(delay) => {
                    // Cleared first so a failed retry can arm the next timer;
                    // a tick landing meanwhile waits on the fetch gate.
                    slot.retry_armed.store(false, Ordering::SeqCst);
                    debug!("[{}] Retrying poll", slot.id);
                    coordinator.refresh_slot(&slot).await;
                }
            }
        });
        true
    }

    /// Relay a switch change to the remote service.
    ///
    /// The cached state is updated optimistically and observers are notified
    /// before the remote answers. If the remote rejects the command the change
    /// is reverted (unless a newer value has arrived meanwhile) and observers
    /// are notified again.
    pub async fn handle_command(
        &self,
        id: &WatchId,
        field: CommandField,
        value: bool,
    ) -> Result<(), CommandError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| CommandError::UnknownWatch(id.clone()))?;

        let previous = {
            let mut record = slot.record.lock().await;
            if let Some(reason) = &record.unavailable {
                return Err(CommandError::Unavailable {
                    watch: id.clone(),
                    reason: reason.clone(),
                });
            }
            let state = record
                .state
                .as_mut()
                .ok_or_else(|| CommandError::NotReady(id.clone()))?;
            let previous = field.get(state);
            if state.set_command_field(field, value) {
                slot.notify(&record);
            }
            previous
        };

        info!("[{}] Sending command {}={}", id, field, value);
        let timeout_after = self.inner.settings.request_timeout;
        let result = timeout(
            timeout_after,
            self.inner.service.send_command(id, field, value),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout(timeout_after)));

        match result {
            Ok(()) => {
                debug!("[{}] Command {}={} accepted", id, field, value);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] Command {}={} rejected: {}", id, field, value, e);
                let mut record = slot.record.lock().await;
                let reverted = match record.state.as_mut() {
                    Some(state) if field.get(state) == value => {
                        state.set_command_field(field, previous)
                    }
                    _ => false,
                };
                if reverted {
                    slot.notify(&record);
                }
                Err(CommandError::Rejected {
                    watch: id.clone(),
                    field,
                    source: e,
                })
            }
        }
    }

    /// Clear failure bookkeeping and resume polling a watch.
    pub async fn reconfigure(&self, id: &WatchId) -> Result<(), CoordinatorError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| CoordinatorError::UnknownWatch(id.clone()))?;
        let mut record = slot.record.lock().await;
        let was_unavailable = record.unavailable.take().is_some();
        record.failures = 0;
        record.degraded_alerted = false;
        record.retry_in = None;
        if was_unavailable {
            info!("[{}] Reconfigured, polling resumes", id);
            slot.notify(&record);
        }
        Ok(())
    }
}

/// Lets entities issue commands without keeping the coordinator alive.
#[derive(Clone)]
pub struct CommandRelay {
    inner: Weak<Inner>,
}

impl CommandRelay {
    pub async fn send(
        &self,
        id: &WatchId,
        field: CommandField,
        value: bool,
    ) -> Result<(), CommandError> {
        let inner = self.inner.upgrade().ok_or(CommandError::CoordinatorGone)?;
        Coordinator { inner }.handle_command(id, field, value).await
    }
}
