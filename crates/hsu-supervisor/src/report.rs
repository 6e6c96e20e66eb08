//! The outcome of one supervised invocation.

use chrono::{DateTime, Utc};
use hsu_common::InvocationId;
use hsu_process::{signal_name, SpawnFailure};
use hsu_resource_limits::UsageSummary;
use hsu_stream::{CapturedOutput, StreamError};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Why an invocation ended. Exactly one cause per report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TerminationCause {
    /// The process exited on its own with an exit code.
    NormalExit,
    /// The policy timeout (or a wait timeout) fired and the process was stopped.
    TimedOut,
    /// The caller cancelled and the process was stopped.
    Cancelled,
    /// The process died from a signal the supervisor did not send as part of escalation.
    SignalTerminated { signal: i32 },
    /// The process never started.
    SpawnFailed(SpawnFailure),
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::NormalExit => "normal_exit",
            TerminationCause::TimedOut => "timed_out",
            TerminationCause::Cancelled => "cancelled",
            TerminationCause::SignalTerminated { .. } => "signal_terminated",
            TerminationCause::SpawnFailed(_) => "spawn_failed",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::SignalTerminated { signal } => match signal_name(*signal) {
                Some(name) => write!(f, "terminated by {}", name),
                None => write!(f, "terminated by signal {}", signal),
            },
            TerminationCause::SpawnFailed(failure) => write!(f, "spawn failed ({})", failure),
            other => f.write_str(other.as_str()),
        }
    }
}

/// How the OS reported the reaped process, whatever the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawExitStatus {
    Code(i32),
    Signal(i32),
}

impl RawExitStatus {
    pub fn from_status(status: &std::process::ExitStatus) -> Option<Self> {
        if let Some(code) = status.code() {
            return Some(RawExitStatus::Code(code));
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Some(RawExitStatus::Signal(signal));
            }
        }

        None
    }
}

/// Immutable result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultReport {
    pub invocation_id: InvocationId,
    pub program: String,
    /// Absent when the process never started.
    pub pid: Option<u32>,
    /// The child's exit code; set only for `NormalExit`.
    pub exit_code: Option<i32>,
    /// Raw status whenever the process was reaped.
    pub exit_status: Option<RawExitStatus>,
    pub termination_cause: TerminationCause,
    /// Present only for streams bound to `Pipe(Capture)`.
    pub stdout: Option<CapturedOutput>,
    pub stderr: Option<CapturedOutput>,
    pub started_at: DateTime<Utc>,
    /// Wall clock from start to final reap.
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// True when the supervisor had to send SIGKILL.
    pub forced_kill: bool,
    pub stream_errors: Vec<StreamError>,
    pub resource_usage: Option<UsageSummary>,
}

impl ResultReport {
    pub(crate) fn spawn_failed(
        invocation_id: InvocationId,
        program: &str,
        failure: SpawnFailure,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            invocation_id,
            program: program.to_string(),
            pid: None,
            exit_code: None,
            exit_status: None,
            termination_cause: TerminationCause::SpawnFailed(failure),
            stdout: None,
            stderr: None,
            started_at,
            duration,
            forced_kill: false,
            stream_errors: Vec::new(),
            resource_usage: None,
        }
    }

    /// Normal exit with code 0.
    pub fn success(&self) -> bool {
        self.termination_cause == TerminationCause::NormalExit && self.exit_code == Some(0)
    }

    /// True when any captured stream lost bytes.
    pub fn is_truncated(&self) -> bool {
        [&self.stdout, &self.stderr]
            .iter()
            .any(|captured| captured.as_ref().map_or(false, |c| c.truncated))
    }

    pub fn stdout_text(&self) -> Option<String> {
        self.stdout.as_ref().map(CapturedOutput::text)
    }

    pub fn stderr_text(&self) -> Option<String> {
        self.stderr.as_ref().map(CapturedOutput::text)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
