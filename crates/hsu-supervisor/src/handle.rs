//! ProcessHandle - the caller's view of one running invocation.
//!
//! Read access goes straight to the shared state machine. Control requests
//! are sent to the invocation task, which is the only writer.

use crate::commands::{AbortCause, InvocationCommand};
use crate::report::ResultReport;
use hsu_common::{ControlError, ControlResult, ExecError, ExecResult, InvocationId, SignalKind};
use hsu_process_state::{ProcessState, ProcessStateMachine, StateSnapshot, StateTransition};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a started invocation.
///
/// Dropping the handle does not stop the child: the invocation task keeps
/// supervising it to completion.
pub struct ProcessHandle {
    control: ProcessController,
    pid: Option<u32>,
    task: Option<JoinHandle<ExecResult<ResultReport>>>,
    result: Option<ExecResult<ResultReport>>,
}

/// Cloneable control side of a [`ProcessHandle`].
///
/// Lets other tasks signal or cancel the child while the owner of the
/// handle is blocked in [`ProcessHandle::wait`].
#[derive(Clone)]
pub struct ProcessController {
    id: InvocationId,
    state: Arc<Mutex<ProcessStateMachine>>,
    cmd_tx: Option<mpsc::Sender<InvocationCommand>>,
    cancel: CancellationToken,
}

impl ProcessController {
    fn map_send_err(&self) -> ControlError {
        ControlError::already_reaped(self.id.clone())
    }

    fn map_recv_err(&self) -> ControlError {
        ControlError::already_reaped(self.id.clone())
    }

    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    pub fn state(&self) -> ProcessState {
        self.state.lock().current_state()
    }

    /// Deliver a signal to the child.
    ///
    /// # Errors
    /// - `NotStarted` if the process never started
    /// - `AlreadyReaped` once the child has been reaped
    /// - `SignalFailed` / `Unsupported` from the OS
    pub async fn signal(&self, kind: SignalKind) -> ControlResult<()> {
        let Some(cmd_tx) = &self.cmd_tx else {
            return Err(ControlError::not_started(self.id.clone()));
        };
        if self.state().is_terminal() {
            return Err(ControlError::already_reaped(self.id.clone()));
        }

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(InvocationCommand::Signal { kind, resp: tx })
            .await
            .map_err(|_| self.map_send_err())?;
        rx.await.map_err(|_| self.map_recv_err())?
    }

    /// Stop the child with the escalation sequence; the report's cause
    /// becomes `Cancelled`. Has no effect once the child is reaped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn abort(&self, cause: AbortCause) {
        if let Some(cmd_tx) = &self.cmd_tx {
            let _ = cmd_tx.send(InvocationCommand::Abort { cause }).await;
        }
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessHandle {
    pub(crate) fn running(
        id: InvocationId,
        pid: u32,
        state: Arc<Mutex<ProcessStateMachine>>,
        cmd_tx: mpsc::Sender<InvocationCommand>,
        cancel: CancellationToken,
        task: JoinHandle<ExecResult<ResultReport>>,
    ) -> Self {
        Self {
            control: ProcessController {
                id,
                state,
                cmd_tx: Some(cmd_tx),
                cancel,
            },
            pid: Some(pid),
            task: Some(task),
            result: None,
        }
    }

    /// A handle for an invocation that never started. `wait` returns the
    /// spawn-failure report immediately.
    pub(crate) fn spawn_failed(id: InvocationId, report: ResultReport) -> Self {
        Self {
            control: ProcessController {
                state: Arc::new(Mutex::new(ProcessStateMachine::new(id.as_str()))),
                id,
                cmd_tx: None,
                cancel: CancellationToken::new(),
            },
            pid: None,
            task: None,
            result: Some(Ok(report)),
        }
    }

    pub fn id(&self) -> &InvocationId {
        &self.control.id
    }

    /// Pid of the child; `None` if it never started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.control.state()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.control.state.lock().snapshot()
    }

    /// Recorded state transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.control.state.lock().state_history().to_vec()
    }

    /// True once the child has been reaped (or never started).
    pub fn is_finished(&self) -> bool {
        self.result.is_some() || self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// A controller that can signal or cancel this invocation from another task.
    pub fn controller(&self) -> ProcessController {
        self.control.clone()
    }

    /// Deliver a signal to the child. See [`ProcessController::signal`].
    pub async fn signal(&self, kind: SignalKind) -> ControlResult<()> {
        self.control.signal(kind).await
    }

    /// Stop the child with the escalation sequence; the report's cause
    /// becomes `Cancelled`. Has no effect once the child is reaped.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Wait for the report.
    ///
    /// If `timeout` elapses first the child is stopped through the same
    /// escalation as a policy timeout and the report's cause is `TimedOut`.
    /// Waiting again returns the same result.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> ExecResult<ResultReport> {
        if let Some(result) = &self.result {
            return result.clone();
        }

        let Some(task) = self.task.as_mut() else {
            return Err(ControlError::not_started(self.control.id.clone()).into());
        };

        let joined = match timeout {
            None => task.await,
            Some(timeout) => match tokio::time::timeout(timeout, &mut *task).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(invocation_id = %self.control.id, timeout_ms = timeout.as_millis() as u64, "Wait timed out, aborting process");
                    self.control.abort(AbortCause::TimedOut).await;
                    task.await
                }
            },
        };
        self.task = None;

        let result = joined
            .unwrap_or_else(|e| Err(ExecError::task_failed(self.control.id.clone(), e.to_string())));
        self.result = Some(result.clone());
        result
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.control.id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}
