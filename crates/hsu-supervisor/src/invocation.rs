//! The invocation task: owns one child from spawn to report.
//!
//! Runs in its own tokio task and is driven by three things: the child's
//! exit, the abort signal (policy timeout or cancellation token) and
//! commands from the [`ProcessHandle`](crate::ProcessHandle). Nothing else
//! touches the child, the pumps or the state machine writer.

use crate::commands::{AbortCause, InvocationCommand};
use crate::events::{EventSink, ExecutionEvent, ExecutionEventKind};
use crate::policy::ExecutionPolicy;
use crate::report::{RawExitStatus, ResultReport, TerminationCause};
use chrono::{DateTime, Utc};
use hsu_common::{ControlResult, ExecError, ExecResult, InvocationId, ProcessError, ProcessResult, SignalKind};
use hsu_process::{
    force_kill, process_exists, send_signal, supports_graceful_termination, terminate_gracefully,
    SignalTarget,
};
use hsu_process_state::ProcessStateMachine;
use hsu_resource_limits::UsageSampler;
use hsu_stream::IoPump;
use parking_lot::Mutex;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Aborted(AbortCause),
}

struct Reaped {
    status: ExitStatus,
    cause: TerminationCause,
    exit_code: Option<i32>,
    forced_kill: bool,
}

pub(crate) struct InvocationActor {
    pub id: InvocationId,
    pub program: String,
    pub child: Child,
    pub pid: u32,
    /// Receiver of supervisor escalation signals (the whole group when enabled).
    pub escalation: SignalTarget,
    pub pump: IoPump,
    pub sampler: Option<UsageSampler>,
    pub state: Arc<Mutex<ProcessStateMachine>>,
    pub policy: ExecutionPolicy,
    pub events: Arc<dyn EventSink>,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl InvocationActor {
    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<InvocationCommand>,
    ) -> ExecResult<ResultReport> {
        // A timeout too large to represent as an instant never fires.
        let deadline = self
            .policy
            .timeout
            .and_then(|timeout| self.started.checked_add(timeout));
        let timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        let mut commands_open = true;

        let outcome = loop {
            tokio::select! {
                status = self.child.wait() => break Outcome::Exited(status),
                _ = &mut timeout => break Outcome::Aborted(AbortCause::TimedOut),
                _ = self.cancel.cancelled() => break Outcome::Aborted(AbortCause::Cancelled),
                cmd = cmd_rx.recv(), if commands_open => match cmd {
                    Some(InvocationCommand::Signal { kind, resp }) => {
                        let _ = resp.send(self.deliver(kind));
                    }
                    Some(InvocationCommand::Abort { cause }) => break Outcome::Aborted(cause),
                    None => commands_open = false,
                },
            }
        };

        let reaped = match outcome {
            Outcome::Exited(status) => status.map(|status| self.exited(status)),
            Outcome::Aborted(cause) => self.escalate(cause, &mut cmd_rx, commands_open).await,
        };
        let duration = self.started.elapsed();

        // The pid may be reused from here on; no more caller signals.
        drop(cmd_rx);

        let reaped = match reaped {
            Ok(reaped) => reaped,
            Err(e) => return Err(self.reap_failed(e).await),
        };

        let resource_usage = match self.sampler.take() {
            Some(sampler) => sampler.finish().await,
            None => None,
        };

        let pumped = self.pump.finish(self.policy.io_drain_timeout).await;
        if pumped.drain_interrupted {
            debug!(invocation_id = %self.id, "Output drain was cut short");
        }
        for error in &pumped.errors {
            warn!(
                invocation_id = %self.id,
                stream = %error.stream,
                error = %error.message,
                "Stream error during invocation"
            );
        }

        Ok(ResultReport {
            invocation_id: self.id,
            program: self.program,
            pid: Some(self.pid),
            exit_code: reaped.exit_code,
            exit_status: RawExitStatus::from_status(&reaped.status),
            termination_cause: reaped.cause,
            stdout: pumped.stdout,
            stderr: pumped.stderr,
            started_at: self.started_at,
            duration,
            forced_kill: reaped.forced_kill,
            stream_errors: pumped.errors,
            resource_usage,
        })
    }

    fn deliver(&self, kind: SignalKind) -> ControlResult<()> {
        debug!(invocation_id = %self.id, pid = self.pid, signal = kind.as_str(), "Delivering caller signal");
        send_signal(SignalTarget::Process(self.pid), kind)
            .map_err(|e| e.into_control(self.id.clone()))
    }

    fn record(&self, transition: impl FnOnce(&mut ProcessStateMachine) -> ProcessResult<()>) {
        if let Err(e) = transition(&mut self.state.lock()) {
            warn!(invocation_id = %self.id, error = %e, "Unexpected state transition");
        }
    }

    fn emit(&self, kind: ExecutionEventKind, detail: Option<String>) {
        let mut event = ExecutionEvent::new(self.id.clone(), kind, Some(self.pid));
        event.detail = detail;
        self.events.emit(event);
    }

    fn exited(&self, status: ExitStatus) -> Reaped {
        let (cause, exit_code) = classify_exit(&status);

        self.record(|sm| sm.transition_to_exited(exit_code));
        self.emit(ExecutionEventKind::Exited, Some(cause.to_string()));
        info!(
            invocation_id = %self.id,
            pid = self.pid,
            exit_code = ?exit_code,
            cause = %cause,
            "Process exited"
        );

        Reaped {
            status,
            cause,
            exit_code,
            forced_kill: false,
        }
    }

    /// Graceful signal, grace period, forced kill. The cause that started
    /// the escalation is the one reported, however the child ends.
    async fn escalate(
        &mut self,
        cause: AbortCause,
        cmd_rx: &mut mpsc::Receiver<InvocationCommand>,
        mut commands_open: bool,
    ) -> io::Result<Reaped> {
        let (reason, event_kind, termination_cause) = match cause {
            AbortCause::TimedOut => ("timed out", ExecutionEventKind::TimedOut, TerminationCause::TimedOut),
            AbortCause::Cancelled => ("cancelled", ExecutionEventKind::Cancelled, TerminationCause::Cancelled),
        };

        self.record(|sm| sm.transition_to_terminating(reason));
        self.pump.stop_input();
        self.emit(event_kind, None);
        info!(
            invocation_id = %self.id,
            pid = self.pid,
            reason,
            grace_ms = self.policy.termination_grace_period.as_millis() as u64,
            "Stopping process"
        );

        let mut graceful_exit = None;

        if supports_graceful_termination() {
            self.signal_escalation(terminate_gracefully(self.escalation), "SIGTERM");

            let grace = tokio::time::sleep(self.policy.termination_grace_period);
            tokio::pin!(grace);

            graceful_exit = loop {
                tokio::select! {
                    status = self.child.wait() => break Some(status?),
                    _ = &mut grace => break None,
                    cmd = cmd_rx.recv(), if commands_open => match cmd {
                        Some(InvocationCommand::Signal { kind, resp }) => {
                            let _ = resp.send(self.deliver(kind));
                        }
                        Some(InvocationCommand::Abort { .. }) => {}
                        None => commands_open = false,
                    },
                }
            };
        }

        let (status, forced_kill) = match graceful_exit {
            Some(status) => {
                debug!(invocation_id = %self.id, pid = self.pid, "Process exited within grace period");
                (status, false)
            }
            None => {
                warn!(invocation_id = %self.id, pid = self.pid, "Grace period elapsed, killing process");
                match force_kill(self.escalation) {
                    Ok(()) | Err(ProcessError::NotFound { .. }) => {}
                    Err(e) => {
                        debug!(invocation_id = %self.id, error = %e, "Signal kill unavailable, killing child directly");
                        self.child.start_kill()?;
                    }
                }
                self.emit(ExecutionEventKind::Killed, Some("SIGKILL".to_string()));
                (self.child.wait().await?, true)
            }
        };

        self.sweep_group();

        let code = status.code();
        self.record(|sm| sm.transition_to_killed(code));

        Ok(Reaped {
            status,
            cause: termination_cause,
            exit_code: None,
            forced_kill,
        })
    }

    fn signal_escalation(&self, result: ProcessResult<()>, signal: &str) {
        match result {
            Ok(()) | Err(ProcessError::NotFound { .. }) => {}
            Err(e) => warn!(invocation_id = %self.id, signal, error = %e, "Escalation signal failed"),
        }
    }

    /// Kill group members that outlived the leader.
    fn sweep_group(&self) {
        if let SignalTarget::Group(pgid) = self.escalation {
            if let Ok(true) = process_exists(self.escalation) {
                debug!(invocation_id = %self.id, pgid, "Killing remaining process group members");
                self.signal_escalation(force_kill(self.escalation), "SIGKILL");
            }
        }
    }

    async fn reap_failed(mut self, error: io::Error) -> ExecError {
        warn!(invocation_id = %self.id, pid = self.pid, error = %error, "Failed to reap process");
        let _ = self.child.start_kill();
        self.pump.stop_input();
        if let Some(sampler) = self.sampler.take() {
            sampler.finish().await;
        }
        self.pump.finish(self.policy.io_drain_timeout).await;
        ExecError::reap(self.id, error.to_string())
    }
}

/// Cause and exit code for a child that ended on its own.
fn classify_exit(status: &ExitStatus) -> (TerminationCause, Option<i32>) {
    match RawExitStatus::from_status(status) {
        Some(RawExitStatus::Code(code)) => (TerminationCause::NormalExit, Some(code)),
        Some(RawExitStatus::Signal(signal)) => (TerminationCause::SignalTerminated { signal }, None),
        None => (TerminationCause::NormalExit, None),
    }
}
