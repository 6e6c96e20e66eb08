//! # HSU Common
//!
//! Common types shared across the HSU process execution crates.
//!
//! This crate provides the foundational pieces every other crate builds on:
//! the error taxonomy (validation, control and low-level process errors) and
//! small domain types such as invocation identifiers and signal kinds.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{
    ControlError, ControlResult, ExecError, ExecResult, ProcessError, ProcessResult,
};
pub use types::{InvocationId, SignalKind, StreamKind};
