//! Error types for the netpipe library.
//!
//! Task failures carry best-effort side-channel context (metrics, last
//! response, partial payload) alongside the original error. Cancellation is
//! never represented here: it is a terminal state, not a failure.

use crate::core::{ResponseDescriptor, TaskId, TaskMetrics};
use bytes::Bytes;
use thiserror::Error;

/// Domain used for errors raised by netpipe itself rather than the task layer.
pub const NETPIPE_ERROR_DOMAIN: &str = "netpipe";

/// Code reported with [`TransportError::cancelled`].
pub const CANCELLED_CODE: i64 = -999;

/// The main error type for ambient netpipe operations.
#[derive(Debug, Error)]
pub enum NetpipeError {
    /// A configuration value was invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The tracing subscriber could not be installed.
    #[error("Logging error: {0}")]
    Logging(String),
}

/// An error reported by the underlying task-execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{domain} error {code}: {message}")]
pub struct TransportError {
    /// The error domain (e.g., "NSURLErrorDomain", "io").
    pub domain: String,
    /// Domain-specific error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl TransportError {
    /// Creates a new transport error.
    #[must_use]
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// The error a task layer reports for a task that was cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(NETPIPE_ERROR_DOMAIN, CANCELLED_CODE, "cancelled")
    }

    /// Returns true if this is the cancellation error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == CANCELLED_CODE && self.domain == NETPIPE_ERROR_DOMAIN
    }
}

/// What went wrong with a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskErrorKind {
    /// The task layer reported an error.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The task completed with neither an error nor a usable payload.
    #[error("Task completed without a usable payload")]
    InvalidOutcome,

    /// The payload could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Side-channel context attached to a task failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    /// Metrics collected for the task before it finished.
    pub metrics: Option<TaskMetrics>,
    /// The last response seen, if any.
    pub response: Option<ResponseDescriptor>,
    /// Any partial payload received.
    pub data: Option<Bytes>,
    /// Whether the task ever stalled waiting for connectivity.
    pub waited_for_connectivity: bool,
}

impl ErrorContext {
    /// Returns true if no context was collected at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_none()
            && self.response.is_none()
            && self.data.is_none()
            && !self.waited_for_connectivity
    }
}

/// A failed task, enriched with whatever context was available.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct TaskError {
    /// The underlying failure.
    #[source]
    pub kind: TaskErrorKind,
    /// Best-effort side-channel context.
    pub context: ErrorContext,
    /// The task that failed, when known.
    pub task_id: Option<TaskId>,
}

impl TaskError {
    /// Creates a task error of the given kind with no context.
    #[must_use]
    pub fn new(kind: TaskErrorKind) -> Self {
        Self {
            kind,
            context: ErrorContext::default(),
            task_id: None,
        }
    }

    /// Creates a transport failure.
    #[must_use]
    pub fn transport(error: TransportError) -> Self {
        Self::new(TaskErrorKind::Transport(error))
    }

    /// Creates an invalid-outcome failure.
    #[must_use]
    pub fn invalid_outcome() -> Self {
        Self::new(TaskErrorKind::InvalidOutcome)
    }

    /// Creates a decode failure.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Decode(message.into()))
    }

    /// Attaches side-channel context.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the task identifier.
    #[must_use]
    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Returns the transport error, if this is a transport failure.
    #[must_use]
    pub fn transport_error(&self) -> Option<&TransportError> {
        match &self.kind {
            TaskErrorKind::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the task layer reported the task as cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.transport_error().is_some_and(TransportError::is_cancelled)
    }

    /// Metrics collected before the failure, if any.
    #[must_use]
    pub fn metrics(&self) -> Option<&TaskMetrics> {
        self.context.metrics.as_ref()
    }

    /// The last response seen before the failure, if any.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseDescriptor> {
        self.context.response.as_ref()
    }

    /// Partial payload received before the failure, if any.
    #[must_use]
    pub fn partial_data(&self) -> Option<&Bytes> {
        self.context.data.as_ref()
    }
}

impl From<TransportError> for TaskError {
    fn from(err: TransportError) -> Self {
        Self::transport(err)
    }
}
