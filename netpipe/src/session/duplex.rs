//! Bidirectional message tasks.

use super::executor::DuplexHandle;
use super::subscription::ProgressHook;
use crate::cancellation::CancellationToken;
use crate::core::{AnyCancellable, CloseCode, TaskDescriptor, TaskId};
use crate::errors::{TaskError, TransportError};
use crate::lifecycle::{TaskLifecycle, TaskSignal};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A message sent or received over a duplex task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl Message {
    /// Returns the text, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

type OpenHook = Arc<dyn Fn(Option<String>) + Send + Sync>;
type CloseHook = Arc<dyn Fn(CloseCode, Option<Bytes>) + Send + Sync>;
type StallHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct DuplexHooks {
    on_open: Option<OpenHook>,
    on_close: Option<CloseHook>,
    on_waiting_for_connectivity: Option<StallHook>,
    on_progress: Option<ProgressHook>,
}

/// A duplex (WebSocket-style) task.
///
/// Hooks may be set at any time and are invoked from a signal pump, never
/// under a lock. After [`cancel`](Self::cancel) or a close event from the
/// peer, hooks stop firing and sends fail with a cancellation error.
/// Dropping the task closes it with [`CloseCode::GOING_AWAY`].
pub struct DuplexTask {
    id: TaskId,
    name: String,
    handle: Arc<dyn DuplexHandle>,
    lifecycle: Arc<dyn TaskLifecycle>,
    hooks: Arc<Mutex<DuplexHooks>>,
    closed: Arc<AtomicBool>,
    cancelled: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DuplexTask {
    pub(crate) fn new(
        handle: Arc<dyn DuplexHandle>,
        lifecycle: Arc<dyn TaskLifecycle>,
        descriptor: &TaskDescriptor,
    ) -> Self {
        let id = handle.id();
        let (tx, rx) = mpsc::unbounded_channel();
        lifecycle.route(id, tx);

        let hooks = Arc::new(Mutex::new(DuplexHooks::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(id, rx, hooks.clone(), closed.clone(), lifecycle.clone());

        Self {
            id,
            name: descriptor.name.clone(),
            handle,
            lifecycle,
            hooks,
            closed,
            cancelled: AtomicBool::new(false),
            pump: Mutex::new(pump),
        }
    }

    /// Identifier of the underlying task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns true once the task was cancelled or closed by the peer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sets the callback fired when the connection opens.
    pub fn on_open<F>(&self, hook: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.hooks.lock().on_open = Some(Arc::new(hook));
    }

    /// Sets the callback fired when the peer closes the connection.
    pub fn on_close<F>(&self, hook: F)
    where
        F: Fn(CloseCode, Option<Bytes>) + Send + Sync + 'static,
    {
        self.hooks.lock().on_close = Some(Arc::new(hook));
    }

    /// Sets the callback fired when the connection stalls waiting for
    /// connectivity.
    pub fn on_waiting_for_connectivity<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.lock().on_waiting_for_connectivity = Some(Arc::new(hook));
    }

    /// Sets the callback fired with `(completed, total)` bytes transferred.
    pub fn on_progress<F>(&self, hook: F)
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.hooks.lock().on_progress = Some(Arc::new(hook));
    }

    /// Opens the connection.
    pub fn connect(&self) {
        info!(task_id = %self.id, name = %self.name, "connecting duplex task");
        self.resume();
    }

    /// Resumes the connection.
    pub fn resume(&self) {
        if !self.is_closed() {
            self.handle.resume();
        }
    }

    /// Suspends the connection.
    pub fn suspend(&self) {
        if !self.is_closed() {
            self.handle.suspend();
        }
    }

    /// Sends one message.
    pub async fn send_message(&self, message: impl Into<Message>) -> Result<(), TaskError> {
        if self.is_closed() {
            return Err(self.cancelled_error());
        }
        let (tx, rx) = oneshot::channel();
        self.handle.send(
            message.into(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        self.settle(rx.await)
    }

    /// Receives the next message.
    pub async fn receive_message(&self) -> Result<Message, TaskError> {
        if self.is_closed() {
            return Err(self.cancelled_error());
        }
        let (tx, rx) = oneshot::channel();
        self.handle.receive(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        self.settle(rx.await)
    }

    /// Sends a ping and waits for the pong.
    pub async fn send_ping(&self) -> Result<(), TaskError> {
        if self.is_closed() {
            return Err(self.cancelled_error());
        }
        let (tx, rx) = oneshot::channel();
        self.handle.send_ping(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        self.settle(rx.await)
    }

    /// Receives continuously, handing each message to `handler`.
    ///
    /// The loop stops after the first error (which is handed over too), when
    /// the task closes, or when the returned handle is cancelled or dropped.
    pub fn on_receive<F>(&self, handler: F) -> AnyCancellable
    where
        F: Fn(Result<Message, TaskError>) + Send + Sync + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!(task_id = %self.id, "no tokio runtime, receive loop not started");
            return AnyCancellable::from_fn(|| {});
        };

        let token = CancellationToken::new();
        let observer = token.clone();
        let handle = self.handle.clone();
        let closed = self.closed.clone();
        let id = self.id;

        runtime.spawn(async move {
            while !closed.load(Ordering::SeqCst) {
                let (tx, rx) = oneshot::channel();
                handle.receive(Box::new(move |result| {
                    let _ = tx.send(result);
                }));
                let received = tokio::select! {
                    received = rx => received,
                    () = observer.cancelled() => break,
                };
                match received {
                    Ok(Ok(message)) => handler(Ok(message)),
                    Ok(Err(error)) => {
                        handler(Err(TaskError::transport(error).with_task_id(id)));
                        break;
                    }
                    Err(_) => break,
                }
            }
            trace!(task_id = %id, "receive loop stopped");
        });

        AnyCancellable::from_fn(move || token.cancel("receive loop cancelled"))
    }

    /// Closes the connection. Idempotent.
    pub fn cancel(&self, code: CloseCode, reason: Option<Bytes>) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.lifecycle.unroute(self.id);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        *self.hooks.lock() = DuplexHooks::default();

        debug!(task_id = %self.id, %code, "cancelling duplex task");
        self.handle.cancel(code, reason);
        self.lifecycle.consume(self.id);
    }

    fn cancelled_error(&self) -> TaskError {
        TaskError::transport(TransportError::cancelled()).with_task_id(self.id)
    }

    fn settle<T>(
        &self,
        received: Result<Result<T, TransportError>, oneshot::error::RecvError>,
    ) -> Result<T, TaskError> {
        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(TaskError::transport(error).with_task_id(self.id)),
            Err(_) => Err(self.cancelled_error()),
        }
    }
}

impl Drop for DuplexTask {
    fn drop(&mut self) {
        self.cancel(CloseCode::GOING_AWAY, None);
    }
}

impl fmt::Debug for DuplexTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_pump(
    id: TaskId,
    mut rx: mpsc::UnboundedReceiver<TaskSignal>,
    hooks: Arc<Mutex<DuplexHooks>>,
    closed: Arc<AtomicBool>,
    lifecycle: Arc<dyn TaskLifecycle>,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!(task_id = %id, "no tokio runtime, duplex hooks will not fire");
        return None;
    };

    Some(runtime.spawn(async move {
        while let Some(signal) = rx.recv().await {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            match signal {
                TaskSignal::Opened { protocol } => {
                    debug!(task_id = %id, ?protocol, "duplex task opened");
                    let hook = hooks.lock().on_open.clone();
                    if let Some(hook) = hook {
                        hook(protocol);
                    }
                }
                TaskSignal::WaitingForConnectivity => {
                    let hook = hooks.lock().on_waiting_for_connectivity.clone();
                    if let Some(hook) = hook {
                        hook();
                    }
                }
                TaskSignal::Progress { completed, total } => {
                    trace!(task_id = %id, completed, ?total, "duplex task progress");
                    let hook = hooks.lock().on_progress.clone();
                    if let Some(hook) = hook {
                        hook(completed, total);
                    }
                }
                TaskSignal::Closed { code, reason } => {
                    debug!(task_id = %id, %code, "duplex task closed by peer");
                    let hook = hooks.lock().on_close.clone();
                    if let Some(hook) = hook {
                        hook(code, reason);
                    }
                    closed.store(true, Ordering::SeqCst);
                    *hooks.lock() = DuplexHooks::default();
                    lifecycle.unroute(id);
                    lifecycle.consume(id);
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{LifecycleCorrelator, LifecycleEvent};
    use crate::session::Session;
    use crate::testing::MockExecutor;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn session() -> (Arc<MockExecutor>, Arc<LifecycleCorrelator>, Session) {
        let executor = Arc::new(MockExecutor::new());
        let lifecycle = Arc::new(LifecycleCorrelator::new());
        let session = Session::with_lifecycle(executor.clone(), lifecycle.clone());
        (executor, lifecycle, session)
    }

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new("wss://stream.example.com/feed").with_name("feed")
    }

    #[tokio::test]
    async fn test_open_and_close_hooks() {
        let (_, lifecycle, session) = session();
        let task = session.duplex_task(descriptor());
        let (open_tx, mut open_rx) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel();

        task.on_open(move |protocol| {
            let _ = open_tx.send(protocol);
        });
        task.on_close(move |code, reason| {
            let _ = close_tx.send((code, reason));
        });
        task.connect();

        lifecycle.record(task.id(), LifecycleEvent::DuplexOpened { protocol: Some("chat".into()) });
        lifecycle.record(
            task.id(),
            LifecycleEvent::DuplexClosed {
                code: CloseCode::NORMAL,
                reason: Some(Bytes::from_static(b"bye")),
            },
        );

        let protocol = tokio::time::timeout(Duration::from_secs(1), open_rx.recv()).await.unwrap();
        assert_eq!(protocol, Some(Some("chat".to_string())));
        let closed = tokio::time::timeout(Duration::from_secs(1), close_rx.recv()).await.unwrap();
        assert_eq!(closed, Some((CloseCode::NORMAL, Some(Bytes::from_static(b"bye")))));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !task.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(task.send_message("late").await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_hook_until_close() {
        let (_, lifecycle, session) = session();
        let task = session.duplex_task(descriptor());
        let (tx, mut rx) = mpsc::unbounded_channel();
        task.on_progress(move |completed, total| {
            let _ = tx.send((completed, total));
        });
        task.connect();

        lifecycle.record(task.id(), LifecycleEvent::Progress { completed: 3, total: None });
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some((3, None)));

        task.cancel(CloseCode::NORMAL, None);
        lifecycle.record(task.id(), LifecycleEvent::Progress { completed: 9, total: None });
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (executor, _, session) = session();
        let task = session.duplex_task(descriptor());
        task.connect();
        let mock = executor.last_duplex().unwrap();
        assert!(mock.is_resumed());

        task.send_message("hello").await.unwrap();
        assert_eq!(mock.sent(), vec![Message::Text("hello".into())]);

        mock.push_incoming(Message::Binary(Bytes::from_static(b"\x01")));
        assert_eq!(
            task.receive_message().await.unwrap(),
            Message::Binary(Bytes::from_static(b"\x01"))
        );
        task.send_ping().await.unwrap();
        assert_eq!(mock.ping_count(), 1);
    }

    #[tokio::test]
    async fn test_on_receive_stops_after_error() {
        let (executor, _, session) = session();
        let task = session.duplex_task(descriptor());
        let mock = executor.last_duplex().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _receiving = task.on_receive(move |result| {
            let _ = tx.send(result);
        });
        mock.push_incoming(Message::Text("a".into()));
        mock.push_incoming(Message::Text("b".into()));
        mock.fail_receive(TransportError::new("ws", 57, "socket not connected"));

        let mut texts = Vec::new();
        while let Ok(Some(result)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            match result {
                Ok(message) => texts.push(message.as_text().unwrap_or_default().to_string()),
                Err(err) => {
                    assert_eq!(err.transport_error().map(|e| e.code), Some(57));
                    break;
                }
            }
        }
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (executor, lifecycle, session) = session();
        let task = session.duplex_task(descriptor());
        let mock = executor.last_duplex().unwrap();
        lifecycle.record(task.id(), LifecycleEvent::WaitingForConnectivity);

        task.cancel(CloseCode::NORMAL, None);
        task.cancel(CloseCode::GOING_AWAY, None);

        assert_eq!(mock.close_code(), Some(CloseCode::NORMAL));
        assert_eq!(mock.cancel_count(), 1);
        assert!(!lifecycle.is_routed(task.id()));
        assert!(!lifecycle.contains(task.id()));
        assert!(task.send_ping().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_closes_going_away() {
        let (executor, _, session) = session();
        let task = session.duplex_task(descriptor());
        let mock = executor.last_duplex().unwrap();

        drop(task);
        assert_eq!(mock.close_code(), Some(CloseCode::GOING_AWAY));
    }
}
