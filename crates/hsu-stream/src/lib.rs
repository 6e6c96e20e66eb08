//! # HSU Stream
//!
//! Standard stream handling for supervised child processes.
//!
//! This crate provides:
//! - [`StreamBinding`]: where each of stdin, stdout and stderr goes
//! - Bounded capture buffers that keep draining past their cap
//! - [`IoPump`]: one task per piped stream, joined before a result is built

pub mod binding;
pub mod capture;
pub mod pump;

// Re-export main types
pub use binding::{
    InputBinding, InputSource, OutputBinding, OutputSink, ResolvedBindings, StreamBinding,
    StreamBindings,
};
pub use capture::{CaptureBuffer, CapturedOutput, DEFAULT_MAX_OUTPUT_BYTES};
pub use pump::{IoPump, PumpOutcome, PumpSettings, StreamError};
