//! Internal command protocol between a `ProcessHandle` and its invocation task.

use hsu_common::{ControlResult, SignalKind};
use tokio::sync::oneshot;

/// Why the supervisor is stopping a running child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortCause {
    TimedOut,
    Cancelled,
}

pub(crate) enum InvocationCommand {
    /// Deliver a caller signal to the child.
    Signal {
        kind: SignalKind,
        resp: oneshot::Sender<ControlResult<()>>,
    },
    /// Stop the child through the escalation sequence.
    Abort { cause: AbortCause },
}
