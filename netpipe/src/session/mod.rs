//! Sessions, publishers and duplex tasks over an external task executor.
//!
//! This module provides:
//! - The executor seam ([`TaskExecutor`], [`TaskHandle`], [`DuplexHandle`])
//! - The publisher/subscription contract and its demand-driven engine
//! - Payload decoders
//! - Duplex tasks
//! - [`Session`], which ties an executor to a lifecycle correlator

mod decode;
mod duplex;
mod executor;
mod publisher;
#[allow(clippy::module_inception)]
mod session;
mod subscription;
mod task;

#[cfg(test)]
mod integration_tests;

pub use decode::{BytesDecoder, DecodePublisher, Decoded, Decoder, JsonDecoder, Utf8Decoder};
pub use duplex::{DuplexTask, Message};
pub use executor::{
    CompletionHandler, DuplexHandle, ReceiveCompletion, SendCompletion, TaskExecutor, TaskHandle,
};
pub use publisher::{Downstream, Publisher, Subscription};
pub use session::{Session, SessionEvents};
pub use subscription::{
    ProgressHook, StallHook, StartHook, SubscriptionPhase, TaskHooks, TaskSubscription,
};
pub use task::TaskPublisher;
