//! # Netpipe
//!
//! Turns callback-based network tasks into composable single-value pipelines.
//!
//! Netpipe provides:
//!
//! - **Single-value pipelines**: eager producers of exactly one success or one
//!   failure, backed by a write-once result cell
//! - **Recovery operators**: `catch_failure` and `replace_failure`
//! - **Two execution substrates**: a FIFO work queue with cooperative
//!   cancellation, and a demand-driven subscription engine
//! - **Lifecycle correlation**: metrics, connectivity stalls and duplex
//!   open/close events matched to the task that produced them
//!
//! The network itself lives behind [`session::TaskExecutor`]; netpipe never
//! opens a socket.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netpipe::prelude::*;
//!
//! let session = Session::new(executor);
//! let mirror = session.clone();
//! let users = session
//!     .pipeline(TaskDescriptor::new("https://api.example.com/users"))
//!     .catch_failure(move |_| mirror.pipeline(TaskDescriptor::new("https://mirror.example.com/users")));
//!
//! if let Some(Ok(output)) = users.wait().await {
//!     println!("{} bytes", output.data.len());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{CorrelatorConfig, QueueConfig, SessionConfig};
    pub use crate::core::{
        AnyCancellable, Cancellable, CloseCode, Demand, HttpMethod, ResponseDescriptor,
        TaskDescriptor, TaskId, TaskKind, TaskMetrics, TaskOutput, UploadSource,
    };
    pub use crate::errors::{NetpipeError, TaskError, TaskErrorKind, TransportError};
    pub use crate::lifecycle::{LifecycleCorrelator, TaskLifecycle};
    pub use crate::pipeline::Pipeline;
    pub use crate::queue::{WorkQueue, WorkState};
    pub use crate::session::{
        Decoded, DuplexTask, JsonDecoder, Message, Publisher, Session, SessionEvents,
        Subscription, TaskExecutor, TaskPublisher, Utf8Decoder,
    };
}
