//! Core types shared by both execution substrates.
//!
//! This module provides:
//! - The write-once result cell backing every pipeline
//! - Demand accounting for subscriptions
//! - Cancellation handles
//! - Task descriptors, responses and metrics exchanged with the task layer

mod cancellable;
mod cell;
mod demand;
mod task;

pub use cancellable::{AnyCancellable, Cancellable};
pub use cell::{CellState, ResultCell};
pub use demand::Demand;
pub use task::{
    CloseCode, HttpMethod, ResponseDescriptor, TaskDescriptor, TaskId, TaskKind, TaskMetrics, TaskOutput,
    UploadSource,
};
