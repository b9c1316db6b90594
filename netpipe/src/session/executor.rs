//! Seam to the external task-execution layer.
//!
//! The execution layer owns sockets, TLS and HTTP. netpipe only creates
//! tasks through a [`TaskExecutor`], resumes and cancels them through their
//! handles, and receives their single completion callback.

use super::duplex::Message;
use crate::core::{CloseCode, ResponseDescriptor, TaskDescriptor, TaskId, TaskKind};
use crate::errors::TransportError;
use bytes::Bytes;
use std::sync::Arc;

/// Invoked once when a one-shot task finishes, with whatever payload,
/// response and error the execution layer has.
pub type CompletionHandler =
    Box<dyn FnOnce(Option<Bytes>, Option<ResponseDescriptor>, Option<TransportError>) + Send>;

/// Invoked once when a duplex send or ping finishes.
pub type SendCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Invoked once when a duplex receive finishes.
pub type ReceiveCompletion = Box<dyn FnOnce(Result<Message, TransportError>) + Send>;

/// A one-shot task created by the execution layer.
pub trait TaskHandle: Send + Sync {
    /// Identifier used to correlate side-channel events.
    fn id(&self) -> TaskId;

    /// Starts (or resumes) the task. The completion handler is never invoked
    /// before the first call.
    fn resume(&self);

    /// Cancels the task. The execution layer may still invoke the completion
    /// handler with a cancellation error.
    fn cancel(&self);
}

/// A bidirectional message task created by the execution layer.
pub trait DuplexHandle: Send + Sync {
    /// Identifier used to correlate side-channel events.
    fn id(&self) -> TaskId;

    /// Starts (or resumes) the connection.
    fn resume(&self);

    /// Suspends the connection.
    fn suspend(&self);

    /// Sends one message.
    fn send(&self, message: Message, completion: SendCompletion);

    /// Receives the next message.
    fn receive(&self, completion: ReceiveCompletion);

    /// Sends a ping and completes when the pong arrives.
    fn send_ping(&self, completion: SendCompletion);

    /// Closes the connection.
    fn cancel(&self, code: CloseCode, reason: Option<Bytes>);
}

/// Factory for tasks.
pub trait TaskExecutor: Send + Sync {
    /// Creates a suspended one-shot task.
    fn create_task(
        &self,
        descriptor: &TaskDescriptor,
        kind: &TaskKind,
        completion: CompletionHandler,
    ) -> Arc<dyn TaskHandle>;

    /// Creates a suspended duplex task.
    fn create_duplex(&self, descriptor: &TaskDescriptor) -> Arc<dyn DuplexHandle>;
}
