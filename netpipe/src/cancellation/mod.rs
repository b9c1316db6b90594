//! Cooperative cancellation.
//!
//! Every unit of work on a [`WorkQueue`](crate::queue::WorkQueue) receives a
//! [`CancellationToken`]. The engine only ever flips the token; the work is
//! responsible for observing it and exiting promptly.

mod token;

pub use token::{CancelCallback, CancellationToken};
