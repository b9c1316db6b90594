//! Publishers for data and upload tasks.

use super::decode::{DecodePublisher, Decoder};
use super::publisher::{Downstream, Publisher, Subscription};
use super::subscription::{TaskHooks, TaskRequest, TaskSubscription};
use crate::core::{TaskDescriptor, TaskId, TaskKind, TaskOutput};
use crate::errors::TaskError;
use std::fmt;
use std::sync::Arc;

/// A lazily started data or upload task.
///
/// Each attached downstream gets its own subscription, and therefore its own
/// task.
#[derive(Clone)]
pub struct TaskPublisher {
    request: TaskRequest,
    hooks: TaskHooks,
}

impl TaskPublisher {
    pub(crate) fn new(request: TaskRequest) -> Self {
        Self {
            request,
            hooks: TaskHooks::default(),
        }
    }

    /// Sets the callback fired when the task stalls waiting for connectivity.
    #[must_use]
    pub fn on_waiting_for_connectivity<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_waiting_for_connectivity = Some(Arc::new(hook));
        self
    }

    /// Sets the callback fired right before the task is resumed.
    #[must_use]
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(TaskId) + Send + Sync + 'static,
    {
        self.hooks.on_start = Some(Arc::new(hook));
        self
    }

    /// Sets the callback fired with `(completed, total)` on each progress
    /// report. `total` is `None` while the expected size is unknown.
    #[must_use]
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.hooks.on_progress = Some(Arc::new(hook));
        self
    }

    /// Decodes the payload of a successful task.
    #[must_use]
    pub fn decode<D: Decoder>(self, decoder: D) -> DecodePublisher<D> {
        DecodePublisher::new(self, decoder)
    }

    /// The request this publisher starts.
    #[must_use]
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.request.descriptor
    }

    /// The kind of task this publisher starts.
    #[must_use]
    pub fn kind(&self) -> &TaskKind {
        &self.request.kind
    }

    /// Attaches a downstream and returns the concrete subscription.
    #[must_use]
    pub fn attach_task(&self, downstream: Downstream<TaskOutput, TaskError>) -> Arc<TaskSubscription> {
        TaskSubscription::new(self.request.clone(), self.hooks.clone(), downstream)
    }
}

impl Publisher for TaskPublisher {
    type Output = TaskOutput;
    type Failure = TaskError;

    fn attach(&self, downstream: Downstream<TaskOutput, TaskError>) -> Arc<dyn Subscription> {
        self.attach_task(downstream)
    }
}

impl fmt::Debug for TaskPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPublisher")
            .field("descriptor", &self.request.descriptor)
            .field("kind", &self.request.kind)
            .field("hooks", &self.hooks)
            .finish()
    }
}
