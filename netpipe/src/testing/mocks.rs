//! In-memory task executor for tests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{TimeZone, Utc};

use crate::core::{CloseCode, ResponseDescriptor, TaskDescriptor, TaskId, TaskKind, TaskMetrics};
use crate::errors::TransportError;
use crate::session::{
    CompletionHandler, DuplexHandle, Message, ReceiveCompletion, SendCompletion, TaskExecutor,
    TaskHandle,
};

/// Fixed metrics for assertions.
#[must_use]
pub fn sample_metrics() -> TaskMetrics {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap_or_default();
    TaskMetrics {
        fetch_start: start,
        response_end: start + chrono::Duration::milliseconds(120),
        redirect_count: 0,
        bytes_sent: 64,
        bytes_received: 2,
    }
}

/// What a [`MockTask`] reports when it completes.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Data plus a 200 response.
    Success(Bytes),
    /// A transport error.
    Failure(TransportError),
    /// No data, no response, no error.
    Empty,
}

impl MockReply {
    /// A successful reply carrying `data`.
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::Success(data.into())
    }
}

type Responder = Arc<dyn Fn(&TaskDescriptor, &TaskKind) -> MockReply + Send + Sync>;

/// A one-shot task driven by the test.
pub struct MockTask {
    id: TaskId,
    descriptor: TaskDescriptor,
    kind: TaskKind,
    completion: Mutex<Option<CompletionHandler>>,
    reply: Option<MockReply>,
    resumed: AtomicBool,
    cancelled: AtomicBool,
}

impl MockTask {
    /// The descriptor the task was created with.
    #[must_use]
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// The kind the task was created with.
    #[must_use]
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Returns true once `resume` was called.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    /// Returns true once `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Invokes the completion handler. Only the first call has any effect.
    pub fn complete(
        &self,
        data: Option<Bytes>,
        response: Option<ResponseDescriptor>,
        error: Option<TransportError>,
    ) {
        let completion = self.completion.lock().take();
        if let Some(completion) = completion {
            completion(data, response, error);
        }
    }

    /// Completes with `data` and a 200 response.
    pub fn succeed(&self, data: impl Into<Bytes>) {
        self.complete(Some(data.into()), Some(ResponseDescriptor::with_status(200)), None);
    }

    /// Completes with a transport error.
    pub fn fail(&self, error: TransportError) {
        self.complete(None, None, Some(error));
    }

    /// Completes according to `reply`.
    pub fn reply(&self, reply: MockReply) {
        match reply {
            MockReply::Success(data) => self.succeed(data),
            MockReply::Failure(error) => self.fail(error),
            MockReply::Empty => self.complete(None, None, None),
        }
    }
}

impl TaskHandle for MockTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        if self.resumed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(reply) = self.reply.clone() {
            self.reply(reply);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.fail(TransportError::cancelled());
    }
}

impl std::fmt::Debug for MockTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTask")
            .field("id", &self.id)
            .field("resumed", &self.is_resumed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Default)]
struct DuplexState {
    incoming: VecDeque<Result<Message, TransportError>>,
    waiting: VecDeque<ReceiveCompletion>,
    sent: Vec<Message>,
    pings: usize,
    resumed: bool,
    suspended: bool,
    close: Option<(CloseCode, Option<Bytes>)>,
    cancels: usize,
}

/// A duplex task driven by the test.
///
/// Sends and pings succeed immediately. Receives are served from the incoming
/// queue, or parked until the test pushes a message.
pub struct MockDuplex {
    id: TaskId,
    state: Mutex<DuplexState>,
}

impl MockDuplex {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(DuplexState::default()),
        }
    }

    /// Delivers a message to the next receive.
    pub fn push_incoming(&self, message: Message) {
        self.deliver(Ok(message));
    }

    /// Fails the next receive.
    pub fn fail_receive(&self, error: TransportError) {
        self.deliver(Err(error));
    }

    fn deliver(&self, result: Result<Message, TransportError>) {
        let waiting = {
            let mut state = self.state.lock();
            match state.waiting.pop_front() {
                Some(completion) => Some(completion),
                None => {
                    state.incoming.push_back(result.clone());
                    None
                }
            }
        };
        if let Some(completion) = waiting {
            completion(result);
        }
    }

    /// Messages sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// Pings sent so far.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.state.lock().pings
    }

    /// Returns true once `resume` was called.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.state.lock().resumed
    }

    /// Returns true while suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Close code of the first `cancel` call.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.state.lock().close.as_ref().map(|(code, _)| *code)
    }

    /// Number of `cancel` calls.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.state.lock().cancels
    }
}

impl DuplexHandle for MockDuplex {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.resumed = true;
        state.suspended = false;
    }

    fn suspend(&self) {
        self.state.lock().suspended = true;
    }

    fn send(&self, message: Message, completion: SendCompletion) {
        self.state.lock().sent.push(message);
        completion(Ok(()));
    }

    fn receive(&self, completion: ReceiveCompletion) {
        let next = {
            let mut state = self.state.lock();
            match state.incoming.pop_front() {
                Some(next) => Some(next),
                None => {
                    state.waiting.push_back(completion);
                    return;
                }
            }
        };
        if let Some(next) = next {
            completion(next);
        }
    }

    fn send_ping(&self, completion: SendCompletion) {
        self.state.lock().pings += 1;
        completion(Ok(()));
    }

    fn cancel(&self, code: CloseCode, reason: Option<Bytes>) {
        let waiting = {
            let mut state = self.state.lock();
            state.cancels += 1;
            if state.close.is_none() {
                state.close = Some((code, reason));
            }
            std::mem::take(&mut state.waiting)
        };
        for completion in waiting {
            completion(Err(TransportError::cancelled()));
        }
    }
}

impl std::fmt::Debug for MockDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDuplex").field("id", &self.id).finish()
    }
}

/// A [`TaskExecutor`] that records every task it creates.
///
/// Task ids are assigned sequentially. Tasks complete only when the test
/// drives them, unless a responder is installed, in which case each task
/// completes with the responder's reply as soon as it is resumed.
pub struct MockExecutor {
    next_id: AtomicU64,
    created: AtomicUsize,
    tasks: Mutex<Vec<Arc<MockTask>>>,
    duplexes: Mutex<Vec<Arc<MockDuplex>>>,
    responder: Option<Responder>,
}

impl MockExecutor {
    /// Creates an executor whose first task id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an executor whose first task id is `first_id`.
    #[must_use]
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            created: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
            duplexes: Mutex::new(Vec::new()),
            responder: None,
        }
    }

    /// Completes every task on resume with the responder's reply.
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&TaskDescriptor, &TaskKind) -> MockReply + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Number of one-shot tasks created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The most recently created one-shot task.
    #[must_use]
    pub fn last_task(&self) -> Option<Arc<MockTask>> {
        self.tasks.lock().last().cloned()
    }

    /// The one-shot task with the given id.
    #[must_use]
    pub fn task_by_id(&self, id: TaskId) -> Option<Arc<MockTask>> {
        self.tasks.lock().iter().find(|task| task.id == id).cloned()
    }

    /// The most recently created duplex task.
    #[must_use]
    pub fn last_duplex(&self) -> Option<Arc<MockDuplex>> {
        self.duplexes.lock().last().cloned()
    }

    fn next_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for MockExecutor {
    fn create_task(
        &self,
        descriptor: &TaskDescriptor,
        kind: &TaskKind,
        completion: CompletionHandler,
    ) -> Arc<dyn TaskHandle> {
        let task = Arc::new(MockTask {
            id: self.next_id(),
            descriptor: descriptor.clone(),
            kind: kind.clone(),
            completion: Mutex::new(Some(completion)),
            reply: self.responder.as_ref().map(|responder| responder(descriptor, kind)),
            resumed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(task.clone());
        task
    }

    fn create_duplex(&self, _descriptor: &TaskDescriptor) -> Arc<dyn DuplexHandle> {
        let duplex = Arc::new(MockDuplex::new(self.next_id()));
        self.duplexes.lock().push(duplex.clone());
        duplex
    }
}

impl std::fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutor")
            .field("created", &self.created_count())
            .finish_non_exhaustive()
    }
}
