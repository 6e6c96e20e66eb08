//! Error types for HSU process execution.
//!
//! Three families of errors exist, matching who has to react to them:
//!
//! - [`ExecError`] is returned from `run`/`start`/`wait`. Apart from
//!   validation it is rare: ordinary outcomes such as a timeout or a failed
//!   spawn are reported as values, not errors.
//! - [`ControlError`] is returned from control operations on a handle
//!   (sending a signal to a process that has already been reaped, etc.).
//! - [`ProcessError`] is returned by low-level pid operations in
//!   `hsu-process` and is mapped by the supervisor into one of the above.
//!
//! ```rust
//! use hsu_common::{ExecError, ExecResult};
//!
//! fn check(program: &str) -> ExecResult<()> {
//!     if program.is_empty() {
//!         return Err(ExecError::invalid_spec("program", "must not be empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check("").is_err());
//! ```

use thiserror::Error;

use crate::types::{InvocationId, SignalKind};

/// Result type for execution operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Result type for handle control operations.
pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Result type for low-level process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors surfaced by the execution entry points.
///
/// Errors are `Clone` so that a handle can hand out the same terminal result
/// every time it is waited on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// Malformed argument spec, stream binding or execution policy.
    /// Detected before any OS resource is touched.
    #[error("Invalid spec: {field} - {reason}")]
    InvalidSpec { field: String, reason: String },

    /// The child was spawned but its exit status could not be collected.
    #[error("Failed to reap process: {id} - {reason}")]
    Reap { id: InvocationId, reason: String },

    /// The invocation task ended abnormally (panic or cancellation of the task itself).
    #[error("Invocation task failed: {id} - {message}")]
    TaskFailed { id: InvocationId, message: String },

    /// A control request could not be completed while waiting.
    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ExecError {
    /// Creates an InvalidSpec error.
    pub fn invalid_spec(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Reap error.
    pub fn reap(id: InvocationId, reason: impl Into<String>) -> Self {
        Self::Reap {
            id,
            reason: reason.into(),
        }
    }

    /// Creates a TaskFailed error.
    pub fn task_failed(id: InvocationId, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            id,
            message: message.into(),
        }
    }

    /// Returns true for errors detected before any resource was allocated.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidSpec { .. })
    }
}

/// Errors from control operations on a process handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Process already reaped: {id}")]
    AlreadyReaped { id: InvocationId },

    #[error("Process was never started: {id}")]
    NotStarted { id: InvocationId },

    #[error("Failed to deliver {signal} to {id}: {reason}")]
    SignalFailed {
        id: InvocationId,
        signal: SignalKind,
        reason: String,
    },

    #[error("Signal {signal} is not supported on this platform")]
    Unsupported { signal: SignalKind },
}

impl ControlError {
    pub fn already_reaped(id: InvocationId) -> Self {
        Self::AlreadyReaped { id }
    }

    pub fn not_started(id: InvocationId) -> Self {
        Self::NotStarted { id }
    }

    pub fn signal_failed(
        id: InvocationId,
        signal: SignalKind,
        reason: impl Into<String>,
    ) -> Self {
        Self::SignalFailed {
            id,
            signal,
            reason: reason.into(),
        }
    }
}

/// Low-level process operation errors (pid based).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process not found: {pid}")]
    NotFound { pid: u32 },

    #[error("Signal {signal} failed for pid {pid}: {reason}")]
    SignalFailed {
        pid: u32,
        signal: SignalKind,
        reason: String,
    },

    #[error("Signal {signal} is not supported on this platform")]
    Unsupported { signal: SignalKind },

    #[error("Process check failed for pid {pid}: {reason}")]
    CheckFailed { pid: u32, reason: String },

    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidState { id: String, from: String, to: String },
}

impl ProcessError {
    pub fn not_found(pid: u32) -> Self {
        Self::NotFound { pid }
    }

    pub fn signal_failed(pid: u32, signal: SignalKind, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            signal,
            reason: reason.into(),
        }
    }

    pub fn unsupported(signal: SignalKind) -> Self {
        Self::Unsupported { signal }
    }

    pub fn check_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::CheckFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Maps a pid-level failure into the handle-level control error.
    pub fn into_control(self, id: InvocationId) -> ControlError {
        match self {
            ProcessError::NotFound { .. } => ControlError::already_reaped(id),
            ProcessError::Unsupported { signal } => ControlError::Unsupported { signal },
            ProcessError::SignalFailed { signal, reason, .. } => {
                ControlError::signal_failed(id, signal, reason)
            }
            ProcessError::CheckFailed { reason, .. } => {
                ControlError::signal_failed(id, SignalKind::Terminate, reason)
            }
            ProcessError::InvalidState { .. } => ControlError::already_reaped(id),
        }
    }
}
