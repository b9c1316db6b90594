//! Demand-driven subscription over a one-shot task.
//!
//! One mutex guards all subscription state. It is held only while fields are
//! mutated: never across the downstream, a hook, `resume` or `cancel` on the
//! task handle.

use super::executor::{CompletionHandler, TaskExecutor, TaskHandle};
use super::publisher::{Downstream, Subscription};
use crate::core::{
    Cancellable, Demand, ResponseDescriptor, TaskDescriptor, TaskId, TaskKind, TaskOutput,
};
use crate::errors::{ErrorContext, TaskError, TransportError};
use crate::lifecycle::{LifecycleRecord, TaskLifecycle, TaskSignal};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Callback fired when a task stalls waiting for connectivity.
pub type StallHook = Arc<dyn Fn() + Send + Sync>;

/// Callback fired right before a task is resumed.
pub type StartHook = Arc<dyn Fn(TaskId) + Send + Sync>;

/// Callback fired with `(completed, total)` as a task transfers data.
pub type ProgressHook = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Optional callbacks attached to a one-shot task.
#[derive(Clone, Default)]
pub struct TaskHooks {
    /// Fired each time the task stalls waiting for connectivity.
    pub on_waiting_for_connectivity: Option<StallHook>,
    /// Fired once, right before the task is resumed.
    pub on_start: Option<StartHook>,
    /// Fired on every progress report while the task is alive.
    pub on_progress: Option<ProgressHook>,
}

impl fmt::Debug for TaskHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHooks")
            .field("on_waiting_for_connectivity", &self.on_waiting_for_connectivity.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Everything a subscription needs to create and track its task.
#[derive(Clone)]
pub(crate) struct TaskRequest {
    pub(crate) executor: Arc<dyn TaskExecutor>,
    pub(crate) lifecycle: Arc<dyn TaskLifecycle>,
    pub(crate) descriptor: TaskDescriptor,
    pub(crate) kind: TaskKind,
    pub(crate) log_requests: bool,
}

/// Where a subscription is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPhase {
    /// Attached, no task yet.
    Idle,
    /// The task exists and has been started.
    Active,
    /// The downstream received its outcome.
    Completed,
    /// Cancelled before an outcome was delivered.
    Cancelled,
}

impl SubscriptionPhase {
    /// Returns true for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

struct State {
    phase: SubscriptionPhase,
    demand: Demand,
    task: Option<Arc<dyn TaskHandle>>,
    downstream: Option<Downstream<TaskOutput, TaskError>>,
    hooks: Option<TaskHooks>,
    pump: Option<JoinHandle<()>>,
}

/// Resources released by a terminal transition, cleaned up outside the lock.
struct Teardown {
    task: Option<Arc<dyn TaskHandle>>,
    pump: Option<JoinHandle<()>>,
}

/// Subscription driving one data or upload task.
///
/// The task is created on the first positive demand and started exactly once.
/// The downstream receives at most one outcome; after that (or after
/// cancellation) the task handle, downstream and hooks are released and any
/// further callbacks are ignored.
pub struct TaskSubscription {
    this: Weak<Self>,
    request: TaskRequest,
    state: Mutex<State>,
}

impl TaskSubscription {
    pub(crate) fn new(
        request: TaskRequest,
        hooks: TaskHooks,
        downstream: Downstream<TaskOutput, TaskError>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            request,
            state: Mutex::new(State {
                phase: SubscriptionPhase::Idle,
                demand: Demand::None,
                task: None,
                downstream: Some(downstream),
                hooks: Some(hooks),
                pump: None,
            }),
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SubscriptionPhase {
        self.state.lock().phase
    }

    /// Accumulated demand.
    #[must_use]
    pub fn demand(&self) -> Demand {
        self.state.lock().demand
    }

    /// Identifier of the task, while it is alive.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.state.lock().task.as_ref().map(|task| task.id())
    }

    fn start(&self) {
        let (task, on_start) = {
            let mut state = self.state.lock();
            if state.phase != SubscriptionPhase::Idle || !state.demand.is_positive() {
                return;
            }
            let Some(this) = self.this.upgrade() else {
                return;
            };

            let completion: CompletionHandler = Box::new(move |data, response, error| {
                this.handle_response(data, response, error);
            });
            let task = self
                .request
                .executor
                .create_task(&self.request.descriptor, &self.request.kind, completion);

            let (tx, rx) = mpsc::unbounded_channel();
            self.request.lifecycle.route(task.id(), tx);
            state.pump = self.spawn_pump(task.id(), rx);
            state.task = Some(task.clone());
            state.phase = SubscriptionPhase::Active;

            let on_start = state.hooks.as_ref().and_then(|hooks| hooks.on_start.clone());
            (task, on_start)
        };

        let id = task.id();
        let descriptor = &self.request.descriptor;
        if self.request.log_requests {
            info!(
                task_id = %id,
                name = %descriptor.name,
                method = %descriptor.method,
                url = %descriptor.url,
                kind = %self.request.kind,
                "starting task"
            );
        }
        if let Some(on_start) = on_start {
            on_start(id);
        }
        task.resume();
    }

    fn spawn_pump(&self, id: TaskId, mut rx: mpsc::UnboundedReceiver<TaskSignal>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(task_id = %id, "no tokio runtime, stalls and progress will not be reported");
            return None;
        };
        let subscription = self.this.clone();

        Some(runtime.spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(subscription) = subscription.upgrade() else {
                    break;
                };
                let hooks = subscription.state.lock().hooks.clone();
                let Some(hooks) = hooks else {
                    continue;
                };
                match signal {
                    TaskSignal::WaitingForConnectivity => {
                        if let Some(hook) = hooks.on_waiting_for_connectivity {
                            debug!(task_id = %id, "task waiting for connectivity");
                            hook();
                        }
                    }
                    TaskSignal::Progress { completed, total } => {
                        if let Some(hook) = hooks.on_progress {
                            trace!(task_id = %id, completed, ?total, "task progress");
                            hook(completed, total);
                        }
                    }
                    other => {
                        trace!(task_id = %id, signal = ?other, "ignoring duplex signal for one-shot task");
                    }
                }
            }
        }))
    }

    fn terminate(state: &mut State, phase: SubscriptionPhase) -> Teardown {
        state.phase = phase;
        state.downstream = None;
        state.hooks = None;
        Teardown {
            task: state.task.take(),
            pump: state.pump.take(),
        }
    }

    fn release(&self, teardown: &Teardown) -> Option<TaskId> {
        if let Some(pump) = &teardown.pump {
            pump.abort();
        }
        let id = teardown.task.as_ref().map(|task| task.id())?;
        self.request.lifecycle.unroute(id);
        Some(id)
    }

    fn handle_response(
        &self,
        data: Option<Bytes>,
        response: Option<ResponseDescriptor>,
        error: Option<TransportError>,
    ) {
        let (downstream, teardown) = {
            let mut state = self.state.lock();
            if state.phase != SubscriptionPhase::Active || !state.demand.is_positive() {
                trace!(phase = ?state.phase, "ignoring completion for inactive subscription");
                return;
            }
            let Some(downstream) = state.downstream.take() else {
                return;
            };
            (downstream, Self::terminate(&mut state, SubscriptionPhase::Completed))
        };

        let id = self.release(&teardown);
        let record = id.and_then(|id| self.request.lifecycle.consume(id));
        let outcome = resolve_outcome(id, data, response, error, record);
        match &outcome {
            Ok(output) => debug!(task_id = ?id, bytes = output.data.len(), "task succeeded"),
            Err(err) => warn!(task_id = ?id, error = %err, "task failed"),
        }
        downstream(outcome);
    }
}

impl Subscription for TaskSubscription {
    fn request(&self, demand: Demand) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.demand += demand;
        }
        self.start();
    }
}

impl Cancellable for TaskSubscription {
    fn cancel(&self) {
        let teardown = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            Self::terminate(&mut state, SubscriptionPhase::Cancelled)
        };

        if let Some(id) = self.release(&teardown) {
            debug!(task_id = %id, "cancelling task");
            if let Some(task) = &teardown.task {
                task.cancel();
            }
            self.request.lifecycle.consume(id);
        }
    }
}

impl fmt::Debug for TaskSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskSubscription")
            .field("descriptor", &self.request.descriptor.name)
            .field("phase", &state.phase)
            .field("demand", &state.demand)
            .finish()
    }
}

/// Builds the terminal outcome from what the task layer reported.
pub(crate) fn resolve_outcome(
    id: Option<TaskId>,
    data: Option<Bytes>,
    response: Option<ResponseDescriptor>,
    error: Option<TransportError>,
    record: Option<LifecycleRecord>,
) -> Result<TaskOutput, TaskError> {
    let (metrics, waited_for_connectivity) = record
        .map(|record| (record.metrics, record.waiting_for_connectivity))
        .unwrap_or_default();

    let failure = match (error, data, response) {
        (None, Some(data), Some(response)) => {
            return Ok(TaskOutput {
                task_id: id,
                data,
                response,
                metrics,
                waited_for_connectivity,
            });
        }
        (Some(error), data, response) => (TaskError::transport(error), data, response),
        (None, data, response) => (TaskError::invalid_outcome(), data, response),
    };

    let (error, data, response) = failure;
    let error = error.with_context(ErrorContext {
        metrics,
        response,
        data,
        waited_for_connectivity,
    });
    Err(match id {
        Some(id) => error.with_task_id(id),
        None => error,
    })
}
