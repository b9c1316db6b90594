//! Concurrent lifecycle correlator.

use super::{LifecycleEvent, LifecycleRecord, SignalSender, TaskLifecycle, TaskSignal};
use crate::config::CorrelatorConfig;
use crate::core::TaskId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

static GLOBAL: OnceLock<Arc<LifecycleCorrelator>> = OnceLock::new();

/// The default [`TaskLifecycle`] implementation.
///
/// Records, routes and tombstones live in separate `DashMap`s, so every event
/// costs one shard lock. Consumed ids are tombstoned to drop late events.
/// Records and tombstones older than the configured TTL are evicted by
/// [`spawn_sweeper`](Self::spawn_sweeper); per-event calls never scan the maps.
/// The [`global`](Self::global) correlator starts its own sweeper.
pub struct LifecycleCorrelator {
    records: DashMap<TaskId, LifecycleRecord>,
    routes: DashMap<TaskId, SignalSender>,
    tombstones: DashMap<TaskId, Instant>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    config: CorrelatorConfig,
}

impl LifecycleCorrelator {
    /// Creates a correlator with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CorrelatorConfig::default())
    }

    /// Creates a correlator with the given configuration.
    #[must_use]
    pub fn with_config(config: CorrelatorConfig) -> Self {
        Self {
            records: DashMap::new(),
            routes: DashMap::new(),
            tombstones: DashMap::new(),
            sweeper: Mutex::new(None),
            config,
        }
    }

    /// The process-wide correlator.
    ///
    /// When called inside a tokio runtime, a sweeper is started on that
    /// runtime unless one is already running.
    pub fn global() -> Arc<Self> {
        let correlator = GLOBAL.get_or_init(|| Arc::new(Self::new())).clone();
        correlator.ensure_sweeper();
        correlator
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Returns true if a record exists for `id`.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.records.contains_key(&id)
    }

    /// Returns true if `id` has a signal route.
    #[must_use]
    pub fn is_routed(&self, id: TaskId) -> bool {
        self.routes.contains_key(&id)
    }

    /// Number of unconsumed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no unconsumed records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops records and tombstones older than the TTL. Returns how many were
    /// removed.
    pub fn evict_expired(&self) -> usize {
        let ttl = self.config.record_ttl();
        let mut evicted = 0;
        self.records.retain(|_, record| {
            let keep = record.created_at.elapsed() < ttl;
            evicted += usize::from(!keep);
            keep
        });
        self.tombstones.retain(|_, consumed_at| {
            let keep = consumed_at.elapsed() < ttl;
            evicted += usize::from(!keep);
            keep
        });
        evicted
    }

    /// Spawns a task that calls [`evict_expired`](Self::evict_expired) every
    /// sweep interval. It stops once the correlator is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let correlator = Arc::downgrade(self);
        let interval = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(correlator) = correlator.upgrade() else {
                    break;
                };
                let evicted = correlator.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "evicted expired lifecycle entries");
                }
            }
        })
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        if Handle::try_current().is_err() {
            return;
        }
        let mut sweeper = self.sweeper.lock();
        // A sweeper from a runtime that has shut down reports finished.
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *sweeper = Some(self.spawn_sweeper());
    }

    /// Returns true while a sweeper started by this correlator is running.
    pub(crate) fn has_sweeper(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn update(&self, id: TaskId, apply: impl FnOnce(&mut LifecycleRecord)) {
        if self.tombstones.contains_key(&id) {
            trace!(task_id = %id, "dropping lifecycle event for consumed task");
            return;
        }
        apply(&mut self.records.entry(id).or_default());
        // `consume` may have run between the check and the insert.
        if self.tombstones.contains_key(&id) {
            self.records.remove(&id);
        }
    }

    fn signal(&self, id: TaskId, signal: TaskSignal) {
        let delivered = match self.routes.get(&id) {
            Some(route) => route.send(signal).is_ok(),
            None => {
                trace!(task_id = %id, ?signal, "no route for task signal");
                return;
            }
        };
        if !delivered {
            trace!(task_id = %id, "task signal receiver is gone, removing route");
            self.routes.remove(&id);
        }
    }
}

impl TaskLifecycle for LifecycleCorrelator {
    fn record(&self, id: TaskId, event: LifecycleEvent) {
        match event {
            LifecycleEvent::MetricsCollected(metrics) => {
                self.update(id, |record| record.metrics = Some(metrics));
            }
            LifecycleEvent::WaitingForConnectivity => {
                self.update(id, |record| record.waiting_for_connectivity = true);
                self.signal(id, TaskSignal::WaitingForConnectivity);
            }
            LifecycleEvent::Progress { completed, total } => {
                self.signal(id, TaskSignal::Progress { completed, total });
            }
            LifecycleEvent::DuplexOpened { protocol } => {
                self.signal(id, TaskSignal::Opened { protocol });
            }
            LifecycleEvent::DuplexClosed { code, reason } => {
                self.signal(id, TaskSignal::Closed { code, reason });
            }
        }
    }

    fn consume(&self, id: TaskId) -> Option<LifecycleRecord> {
        self.tombstones.insert(id, Instant::now());
        self.records.remove(&id).map(|(_, record)| record)
    }

    fn route(&self, id: TaskId, signals: SignalSender) {
        // A routed id belongs to a live task, even if an earlier task used it.
        self.tombstones.remove(&id);
        self.routes.insert(id, signals);
    }

    fn unroute(&self, id: TaskId) {
        self.routes.remove(&id);
    }
}

impl Default for LifecycleCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCorrelator")
            .field("records", &self.records.len())
            .field("routes", &self.routes.len())
            .field("tombstones", &self.tombstones.len())
            .finish()
    }
}
