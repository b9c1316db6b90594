//! Work-queue execution substrate.
//!
//! A [`WorkQueue`] dequeues [`WorkItem`]s in FIFO order and runs their bodies
//! under a concurrency limit. Cancellation flips the item's token; bodies are
//! never aborted from the outside.

mod engine;
mod item;

pub use engine::WorkQueue;
pub use item::{WorkItem, WorkState};
