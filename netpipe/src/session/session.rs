//! The session: executor plus lifecycle correlator.

use super::duplex::DuplexTask;
use super::executor::TaskExecutor;
use super::publisher::Publisher;
use super::subscription::TaskRequest;
use super::task::TaskPublisher;
use crate::config::SessionConfig;
use crate::core::{CloseCode, TaskDescriptor, TaskId, TaskKind, TaskMetrics, TaskOutput, UploadSource};
use crate::errors::TaskError;
use crate::lifecycle::{LifecycleCorrelator, LifecycleEvent, TaskLifecycle};
use crate::pipeline::Pipeline;
use crate::queue::WorkQueue;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// Builds publishers, pipelines and duplex tasks on top of a
/// [`TaskExecutor`].
///
/// Side-channel events reported through [`Session::events`] are correlated
/// with the tasks this session created.
#[derive(Clone)]
pub struct Session {
    executor: Arc<dyn TaskExecutor>,
    lifecycle: Arc<dyn TaskLifecycle>,
    config: SessionConfig,
}

impl Session {
    /// Creates a session that uses the process-wide correlator.
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_lifecycle(executor, LifecycleCorrelator::global())
    }

    /// Creates a session with an injected correlator.
    pub fn with_lifecycle(executor: Arc<dyn TaskExecutor>, lifecycle: Arc<dyn TaskLifecycle>) -> Self {
        Self {
            executor,
            lifecycle,
            config: SessionConfig::default(),
        }
    }

    /// Creates a session with its own correlator built from `config`.
    ///
    /// When called inside a tokio runtime, the correlator's sweeper is started
    /// too; it stops when the last session clone is dropped.
    pub fn from_config(executor: Arc<dyn TaskExecutor>, config: SessionConfig) -> Self {
        let correlator = Arc::new(LifecycleCorrelator::with_config(config.correlator.clone()));
        if Handle::try_current().is_ok() {
            correlator.spawn_sweeper();
        }
        Self::with_lifecycle(executor, correlator).with_config(config)
    }

    /// Replaces the configuration.
    ///
    /// The correlator settings only apply through [`Session::from_config`].
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The correlator in use.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<dyn TaskLifecycle> {
        &self.lifecycle
    }

    /// Entry point for the execution layer's side-channel events.
    #[must_use]
    pub fn events(&self) -> SessionEvents {
        SessionEvents {
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// A plain request.
    #[must_use]
    pub fn data_task(&self, descriptor: TaskDescriptor) -> TaskPublisher {
        self.task(descriptor, TaskKind::Data)
    }

    /// An upload.
    #[must_use]
    pub fn upload_task(&self, descriptor: TaskDescriptor, source: UploadSource) -> TaskPublisher {
        self.task(descriptor, TaskKind::Upload(source))
    }

    /// A duplex connection. Call [`DuplexTask::connect`] to open it.
    #[must_use]
    pub fn duplex_task(&self, descriptor: TaskDescriptor) -> DuplexTask {
        let handle = self.executor.create_duplex(&descriptor);
        debug!(session = %self.config.name, task_id = %handle.id(), name = %descriptor.name, "created duplex task");
        DuplexTask::new(handle, self.lifecycle.clone(), &descriptor)
    }

    /// A plain request, already running, as a pipeline.
    ///
    /// Each pipeline gets its own queue built from the session's queue
    /// settings.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn pipeline(&self, descriptor: TaskDescriptor) -> Pipeline<TaskOutput, TaskError> {
        let queue = WorkQueue::new(self.config.queue.clone());
        self.data_task(descriptor).into_pipeline_on(&queue)
    }

    fn task(&self, descriptor: TaskDescriptor, kind: TaskKind) -> TaskPublisher {
        TaskPublisher::new(TaskRequest {
            executor: self.executor.clone(),
            lifecycle: self.lifecycle.clone(),
            descriptor,
            kind,
            log_requests: self.config.log_requests,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Reports side-channel events for tasks created by a [`Session`].
///
/// Safe to call from any thread, including from inside execution-layer
/// callbacks.
#[derive(Clone)]
pub struct SessionEvents {
    lifecycle: Arc<dyn TaskLifecycle>,
}

impl SessionEvents {
    /// Metrics finished collecting for a task.
    pub fn metrics_collected(&self, id: TaskId, metrics: TaskMetrics) {
        trace!(task_id = %id, duration_ms = metrics.duration_ms(), "metrics collected");
        self.lifecycle.record(id, LifecycleEvent::MetricsCollected(metrics));
    }

    /// A task stalled waiting for connectivity.
    pub fn waiting_for_connectivity(&self, id: TaskId) {
        trace!(task_id = %id, "waiting for connectivity");
        self.lifecycle.record(id, LifecycleEvent::WaitingForConnectivity);
    }

    /// A task transferred `completed` of `total` bytes.
    pub fn progress(&self, id: TaskId, completed: u64, total: Option<u64>) {
        self.lifecycle.record(id, LifecycleEvent::Progress { completed, total });
    }

    /// A duplex connection opened.
    pub fn duplex_opened(&self, id: TaskId, protocol: Option<String>) {
        self.lifecycle.record(id, LifecycleEvent::DuplexOpened { protocol });
    }

    /// A duplex connection was closed by the peer.
    pub fn duplex_closed(&self, id: TaskId, code: CloseCode, reason: Option<Bytes>) {
        self.lifecycle.record(id, LifecycleEvent::DuplexClosed { code, reason });
    }
}

impl fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvents").finish_non_exhaustive()
    }
}
