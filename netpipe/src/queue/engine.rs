//! FIFO work queue with bounded concurrency.

use super::item::{WorkFn, WorkItem};
use crate::cancellation::CancellationToken;
use crate::config::QueueConfig;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

type Registry = Arc<Mutex<HashMap<u64, Arc<WorkItem>>>>;

struct QueueInner {
    id: Uuid,
    config: QueueConfig,
    tx: mpsc::UnboundedSender<Arc<WorkItem>>,
    items: Registry,
    next_id: AtomicU64,
    handle: Handle,
}

/// An ordered, cancelable execution substrate.
///
/// Items are dequeued in the order they were enqueued. At most
/// `max_concurrency` bodies run at once (`0` means unbounded). Clones share the
/// same queue; the dispatcher stops once every handle is dropped and the
/// backlog has drained.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    /// Creates a queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::with_handle(config, &Handle::current())
    }

    /// Creates a sequential queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(QueueConfig::sequential(name))
    }

    /// Creates a queue whose dispatcher and bodies run on `handle`.
    #[must_use]
    pub fn with_handle(config: QueueConfig, handle: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let items: Registry = Arc::new(Mutex::new(HashMap::new()));
        let permits = match config.max_concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        let id = Uuid::new_v4();

        handle.spawn(dispatch(
            rx,
            items.clone(),
            Arc::new(Semaphore::new(permits)),
            handle.clone(),
            config.name.clone(),
        ));
        debug!(queue = %config.name, %id, max_concurrency = config.max_concurrency, "work queue started");

        Self {
            inner: Arc::new(QueueInner {
                id,
                config,
                tx,
                items,
                next_id: AtomicU64::new(1),
                handle: handle.clone(),
            }),
        }
    }

    /// Enqueues a unit of work.
    ///
    /// The body receives the item's cancellation token and is expected to
    /// observe it.
    pub fn enqueue<F, Fut>(&self, label: impl Into<String>, work: F) -> Arc<WorkItem>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        let work: WorkFn = Box::new(move |token| work(token).boxed());
        let item = WorkItem::new(id, label, work);

        self.inner.items.lock().insert(id, item.clone());
        if self.inner.tx.send(item.clone()).is_err() {
            warn!(queue = %self.inner.config.name, item = id, "dispatcher is gone, discarding work item");
            item.discard();
            self.inner.items.lock().remove(&id);
        } else {
            debug!(queue = %self.inner.config.name, item = id, label = %item.label(), "work item enqueued");
        }
        item
    }

    /// Cancels every waiting and running item.
    pub fn cancel_all(&self, reason: &str) {
        let items: Vec<_> = self.inner.items.lock().values().cloned().collect();
        debug!(queue = %self.inner.config.name, count = items.len(), reason, "cancelling all work items");
        for item in items {
            item.cancel(reason);
        }
    }

    /// Number of items not yet terminal.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .items
            .lock()
            .values()
            .filter(|item| !item.state().is_terminal())
            .count()
    }

    /// Returns true if both handles refer to the same queue.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Unique identifier of this queue.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Concurrency limit (`0` means unbounded).
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.inner.config.max_concurrency
    }

    /// Returns true if the queue runs one item at a time.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.inner.config.is_sequential()
    }

    /// The runtime the queue runs on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Arc<WorkItem>>,
    items: Registry,
    semaphore: Arc<Semaphore>,
    handle: Handle,
    queue: String,
) {
    while let Some(item) = rx.recv().await {
        if item.token().is_cancelled() {
            item.discard();
            items.lock().remove(&item.id());
            continue;
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let items = items.clone();
        handle.spawn(async move {
            let id = item.id();
            item.run().await;
            items.lock().remove(&id);
            drop(permit);
        });
    }

    // Anything still registered never got a permit.
    let leftovers: Vec<_> = items.lock().drain().map(|(_, item)| item).collect();
    for item in leftovers {
        item.discard();
    }
    debug!(queue = %queue, "work queue dispatcher stopped");
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("max_concurrency", &self.inner.config.max_concurrency)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkState;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_items_run_in_fifo_order() {
        let queue = WorkQueue::sequential("fifo");
        let order = Arc::new(Mutex::new(Vec::new()));

        let items: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                queue.enqueue(format!("step-{i}"), move |_token| async move {
                    tokio::task::yield_now().await;
                    order.lock().push(i);
                })
            })
            .collect();

        for item in &items {
            item.finished().await;
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_queue_never_overlaps() {
        let queue = WorkQueue::sequential("serial");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<_> = (0..4)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                queue.enqueue("overlap", move |_token| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for item in &items {
            item.finished().await;
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_queue_runs_in_parallel() {
        let queue = WorkQueue::new(QueueConfig::new().with_name("pair").with_max_concurrency(2));
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        // Each body waits for the other to start; only works if both run at once.
        let a = queue.enqueue("a", move |_token| async move {
            let _ = first_tx.send(());
            let _ = second_rx.await;
        });
        let b = queue.enqueue("b", move |_token| async move {
            let _ = first_rx.await;
            let _ = second_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            a.finished().await;
            b.finished().await;
        })
        .await
        .expect("bounded queue should run both items concurrently");
    }

    #[tokio::test]
    async fn test_cancel_all_is_cooperative() {
        let queue = WorkQueue::sequential("cancel");
        let (started_tx, started_rx) = oneshot::channel();

        let running = queue.enqueue("long", move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
        });
        let waiting = queue.enqueue("never", |_token| async move {
            panic!("cancelled item must not run");
        });

        started_rx.await.unwrap();
        assert_eq!(running.state(), WorkState::Running);
        queue.cancel_all("shutdown");

        running.finished().await;
        waiting.finished().await;
        assert_eq!(running.state(), WorkState::Cancelled);
        assert_eq!(waiting.state(), WorkState::Cancelled);
        assert_eq!(running.token().reason(), Some("shutdown".to_string()));
    }

    #[tokio::test]
    async fn test_is_same() {
        let queue = WorkQueue::sequential("a");
        let clone = queue.clone();
        let other = WorkQueue::sequential("a");

        assert!(queue.is_same(&clone));
        assert!(!queue.is_same(&other));
        assert_ne!(queue.id(), other.id());
        assert!(queue.is_sequential());
        assert_eq!(queue.name(), "a");
    }
}
