//! The single-value pipeline.

use crate::cancellation::CancellationToken;
use crate::core::{AnyCancellable, ResultCell};
use crate::queue::{WorkItem, WorkQueue, WorkState};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An eager producer of exactly one success value or one failure.
///
/// Construction schedules the work; there is nothing to "start". The outcome
/// is stored in a write-once [`ResultCell`] and the pipeline is terminal once
/// its work item is terminal. A pipeline whose work item was cancelled before
/// the cell was written stays pending forever and delivers nothing.
///
/// Clones observe the same cell and the same work item.
pub struct Pipeline<T, E> {
    queue: WorkQueue,
    cell: Arc<ResultCell<T, E>>,
    item: Arc<WorkItem>,
}

impl<T, E> Clone for Pipeline<T, E> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            cell: self.cell.clone(),
            item: self.item.clone(),
        }
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Runs `work` on a fresh sequential queue.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F, Fut>(work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let queue = WorkQueue::sequential("netpipe.pipeline");
        Self::spawn_on(&queue, "pipeline", work)
    }

    /// Runs `work` on an existing queue.
    ///
    /// If the work item is cancelled, whatever the body returns is discarded.
    pub fn spawn_on<F, Fut>(queue: &WorkQueue, label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::schedule(queue, label, move |token| async move {
            let result = work(token.clone()).await;
            // An outcome produced after cancellation is dropped.
            (!token.is_cancelled()).then_some(result)
        })
    }

    /// A pipeline that succeeds with `value`.
    pub fn just(value: T) -> Self {
        Self::spawn(move |_token| async move { Ok(value) })
    }

    /// A pipeline that fails with `error`.
    pub fn fail(error: E) -> Self {
        Self::spawn(move |_token| async move { Err(error) })
    }

    /// Schedules a body that may decline to produce an outcome.
    ///
    /// `None` leaves the cell pending; the body uses it when it observed
    /// cancellation.
    pub(crate) fn schedule<F, Fut>(queue: &WorkQueue, label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Result<T, E>>> + Send + 'static,
    {
        let cell = Arc::new(ResultCell::new());
        let writer = cell.clone();
        let item = queue.enqueue(label, move |token| async move {
            if let Some(result) = work(token).await {
                writer.fill(result);
            }
        });

        Self {
            queue: queue.clone(),
            cell,
            item,
        }
    }

    /// The queue this pipeline runs on.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// State of the underlying work item.
    #[must_use]
    pub fn state(&self) -> WorkState {
        self.item.state()
    }

    /// Returns true while no outcome has been stored.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.cell.is_pending()
    }

    /// Completes once the work item is finished or cancelled.
    pub async fn finished(&self) {
        self.item.finished().await;
    }

    /// Requests cooperative cancellation of the work.
    pub fn cancel(&self) {
        self.item.cancel("pipeline cancelled");
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Reads the outcome without waiting.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.cell.get()
    }

    /// Waits for the pipeline to be terminal and returns its outcome.
    ///
    /// Returns `None` if the pipeline was cancelled before producing one.
    pub async fn wait(&self) -> Option<Result<T, E>> {
        self.finished().await;
        self.peek()
    }

    /// Delivers the outcome to `on_result` once it is available.
    ///
    /// Nothing is delivered if the pipeline is cancelled or the returned handle
    /// is cancelled (or dropped) first.
    pub fn subscribe<F>(&self, on_result: F) -> AnyCancellable
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let observer = token.clone();
        let pipeline = self.clone();

        self.queue.handle().spawn(async move {
            tokio::select! {
                () = observer.cancelled() => {}
                () = pipeline.finished() => {
                    if !observer.is_cancelled() {
                        if let Some(result) = pipeline.peek() {
                            on_result(result);
                        }
                    }
                }
            }
        });

        AnyCancellable::from_fn(move || token.cancel("subscriber cancelled"))
    }
}

impl<T, E> fmt::Debug for Pipeline<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("queue", &self.queue.name())
            .field("item", &self.item.id())
            .field("state", &self.item.state())
            .field("pending", &self.cell.is_pending())
            .finish()
    }
}
