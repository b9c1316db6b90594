//! Schedulable, cancelable units of work.

use crate::cancellation::CancellationToken;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// The execution state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Queued, not yet dequeued.
    Waiting,
    /// Dequeued and executing.
    Running,
    /// Body completed without cancellation.
    Finished,
    /// Cancelled before the body completed (or before it started).
    Cancelled,
}

impl WorkState {
    /// Returns true for `Finished` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub(crate) type WorkFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// One unit of sequential work owned by a [`WorkQueue`](super::WorkQueue).
///
/// The item reports completion by finishing its body. A body that panics is
/// logged and the item still reaches a terminal state; any failure the work
/// wants to surface must be recorded by the work itself.
pub struct WorkItem {
    id: u64,
    label: String,
    token: CancellationToken,
    state: watch::Sender<WorkState>,
    work: Mutex<Option<WorkFn>>,
}

impl WorkItem {
    pub(crate) fn new(id: u64, label: String, work: WorkFn) -> Arc<Self> {
        let (state, _) = watch::channel(WorkState::Waiting);
        Arc::new(Self {
            id,
            label,
            token: CancellationToken::new(),
            state,
            work: Mutex::new(Some(work)),
        })
    }

    /// Queue-local identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkState {
        *self.state.borrow()
    }

    /// The token handed to the body.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cooperative cancellation.
    ///
    /// A waiting item is cancelled on the spot and its body never runs. A
    /// running item keeps running until its body observes the token.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
        if self.discard() {
            debug!(item = self.id, label = %self.label, "work item cancelled before it started");
        }
    }

    /// Completes once the item is `Finished` or `Cancelled`.
    pub async fn finished(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    fn transition(&self, from: WorkState, to: WorkState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Moves a waiting item straight to `Cancelled`, dropping its body.
    pub(crate) fn discard(&self) -> bool {
        let discarded = self.transition(WorkState::Waiting, WorkState::Cancelled);
        if discarded {
            drop(self.work.lock().take());
        }
        discarded
    }

    /// Runs the body. Called once by the dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if the item was already dequeued.
    pub(crate) async fn run(self: Arc<Self>) {
        if !self.transition(WorkState::Waiting, WorkState::Running) {
            // Lost a race against `cancel` while the dispatcher held it.
            assert_eq!(
                self.state(),
                WorkState::Cancelled,
                "work item {} dequeued twice",
                self.id
            );
            return;
        }

        let work = self.work.lock().take();
        if self.token.is_cancelled() {
            drop(work);
            self.transition(WorkState::Running, WorkState::Cancelled);
            debug!(item = self.id, label = %self.label, "work item cancelled on dequeue");
            return;
        }

        if let Some(work) = work {
            let token = self.token.clone();
            let outcome = AssertUnwindSafe(async move { work(token).await })
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                error!(
                    item = self.id,
                    label = %self.label,
                    "work item panicked: {}",
                    panic_message(&*panic)
                );
            }
        }

        let terminal = if self.token.is_cancelled() {
            WorkState::Cancelled
        } else {
            WorkState::Finished
        };
        self.transition(WorkState::Running, terminal);
        debug!(item = self.id, label = %self.label, state = %terminal, "work item done");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}
