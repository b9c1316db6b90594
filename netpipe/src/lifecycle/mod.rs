//! Correlation of out-of-band task lifecycle events.
//!
//! The task-execution layer reports metrics, connectivity stalls, transfer
//! progress and duplex open/close events separately from task completion.
//! This module keeps those events keyed by [`TaskId`] until the owning
//! pipeline consumes them, and routes the ones that need an immediate reaction
//! to the task's own channel.

mod correlator;

pub use correlator::LifecycleCorrelator;

use crate::core::{CloseCode, TaskId, TaskMetrics};
use bytes::Bytes;
use std::time::Instant;
use tokio::sync::mpsc;

/// A side-channel event reported by the task-execution layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Timing metrics finished collecting.
    MetricsCollected(TaskMetrics),
    /// The task is stalled waiting for connectivity.
    WaitingForConnectivity,
    /// Bytes transferred so far.
    Progress {
        /// Units completed.
        completed: u64,
        /// Expected units, when known.
        total: Option<u64>,
    },
    /// A duplex connection opened.
    DuplexOpened {
        /// Negotiated subprotocol, if any.
        protocol: Option<String>,
    },
    /// A duplex connection closed.
    DuplexClosed {
        /// Close code sent by the peer.
        code: CloseCode,
        /// Close reason payload.
        reason: Option<Bytes>,
    },
}

/// A signal delivered to the task that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSignal {
    /// The task is stalled waiting for connectivity.
    WaitingForConnectivity,
    /// Bytes transferred so far.
    Progress {
        /// Units completed.
        completed: u64,
        /// Expected units, when known.
        total: Option<u64>,
    },
    /// A duplex connection opened.
    Opened {
        /// Negotiated subprotocol, if any.
        protocol: Option<String>,
    },
    /// A duplex connection closed.
    Closed {
        /// Close code sent by the peer.
        code: CloseCode,
        /// Close reason payload.
        reason: Option<Bytes>,
    },
}

/// Channel end a task registers to receive its own signals.
pub type SignalSender = mpsc::UnboundedSender<TaskSignal>;

/// Side-channel state collected for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleRecord {
    /// Metrics, once collected.
    pub metrics: Option<TaskMetrics>,
    /// Whether the task ever stalled waiting for connectivity.
    pub waiting_for_connectivity: bool,
    /// When the record was created.
    pub created_at: Instant,
}

impl LifecycleRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: None,
            waiting_for_connectivity: false,
            created_at: Instant::now(),
        }
    }
}

impl Default for LifecycleRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyed store of lifecycle events and per-task signal routes.
///
/// Implementations must be safe to call from any thread, including from inside
/// task-layer callbacks. A record is removed exactly once by `consume`; events
/// arriving for a consumed id are dropped.
pub trait TaskLifecycle: Send + Sync {
    /// Records an event for a task.
    fn record(&self, id: TaskId, event: LifecycleEvent);

    /// Removes and returns the record for a task.
    fn consume(&self, id: TaskId) -> Option<LifecycleRecord>;

    /// Registers the channel that receives the task's signals.
    fn route(&self, id: TaskId, signals: SignalSender);

    /// Removes the task's signal route.
    fn unroute(&self, id: TaskId);
}
