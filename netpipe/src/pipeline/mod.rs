//! Single-value pipelines and their recovery operators.
//!
//! This module provides:
//! - [`Pipeline`], an eager producer of one success or one failure
//! - `replace_failure` (Replace-Error)
//! - `catch_failure` (Catch)

mod catch;
mod replace;
mod single;

pub use single::Pipeline;
