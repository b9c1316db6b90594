//! Testing utilities for netpipe.
//!
//! This module provides an in-memory task executor so sessions, publishers,
//! pipelines and duplex tasks can be driven without a network.

mod mocks;

pub use mocks::{sample_metrics, MockDuplex, MockExecutor, MockReply, MockTask};
