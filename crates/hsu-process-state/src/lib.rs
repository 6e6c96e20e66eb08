use chrono::{DateTime, Utc};
use hsu_common::errors::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 100;

/// Lifecycle state of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Handle exists; the process has not been started (or failed to start)
    Created,
    /// Process is running and has a pid
    Running,
    /// Abort fired: graceful signal sent, waiting for exit or forced kill
    Terminating,
    /// Process exited on its own and was reaped
    Exited,
    /// Process was terminated by the supervisor and reaped
    Killed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Created => write!(f, "created"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Terminating => write!(f, "terminating"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Killed => write!(f, "killed"),
        }
    }
}

impl ProcessState {
    /// Check if the process has been reaped
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Killed)
    }

    /// Check if a live process may exist in this state
    pub fn is_alive(&self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Terminating)
    }
}

/// Represents a state transition with timestamp and optional reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ProcessState,
    pub to_state: ProcessState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Point-in-time view of a state machine, handed out to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

/// State machine for one supervised process.
///
/// `pid` is assigned once on entering `Running`. The exit code is recorded
/// exactly once, on the transition into `Exited` or `Killed`; terminal
/// states accept no further transitions.
#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    invocation_id: String,
    current_state: ProcessState,
    previous_state: Option<ProcessState>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    state_history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl ProcessStateMachine {
    /// Create a new state machine in `Created`
    pub fn new(invocation_id: &str) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            current_state: ProcessState::Created,
            previous_state: None,
            pid: None,
            exit_code: None,
            state_history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn current_state(&self) -> ProcessState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<ProcessState> {
        self.previous_state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code recorded at reap time. `None` before reaping, and after
    /// reaping when the process died from a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.current_state,
            pid: self.pid,
            exit_code: self.exit_code,
        }
    }

    /// Check if a transition from current state to target state is valid
    pub fn is_valid_transition(&self, target_state: ProcessState) -> bool {
        matches!(
            (self.current_state, target_state),
            (ProcessState::Created, ProcessState::Running)
                | (ProcessState::Running, ProcessState::Terminating)
                | (ProcessState::Running, ProcessState::Exited)
                | (ProcessState::Terminating, ProcessState::Killed)
        )
    }

    fn transition_to(&mut self, target_state: ProcessState, reason: Option<String>) -> ProcessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(ProcessError::invalid_state(
                &self.invocation_id,
                self.current_state.to_string(),
                target_state.to_string(),
            ));
        }

        let now = Utc::now();
        let from_state = self.current_state;
        self.state_history.push(StateTransition {
            from_state,
            to_state: target_state,
            timestamp: now,
            reason,
        });

        // Limit history size to prevent unbounded growth
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(from_state);
        self.current_state = target_state;
        self.last_transition_time = now;

        tracing::debug!(
            invocation_id = %self.invocation_id,
            from = %from_state,
            to = %target_state,
            "State transition"
        );

        Ok(())
    }

    /// `Created -> Running`, assigning the pid.
    pub fn transition_to_running(&mut self, pid: u32) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some(format!("spawned with pid {}", pid)))?;
        self.pid = Some(pid);
        Ok(())
    }

    /// `Running -> Terminating` when the abort signal fires.
    pub fn transition_to_terminating(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Terminating, Some(reason.into()))
    }

    /// `Running -> Exited` after a natural exit has been reaped.
    pub fn transition_to_exited(&mut self, exit_code: Option<i32>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Exited, Some(describe_exit(exit_code)))?;
        self.exit_code = exit_code;
        Ok(())
    }

    /// `Terminating -> Killed` once the aborted process has been reaped,
    /// whether it yielded during the grace period or needed a forced kill.
    pub fn transition_to_killed(&mut self, exit_code: Option<i32>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Killed, Some(describe_exit(exit_code)))?;
        self.exit_code = exit_code;
        Ok(())
    }

    /// Time spent in the current state
    pub fn time_in_current_state(&self) -> chrono::Duration {
        Utc::now() - self.last_transition_time
    }

    /// Time between entering `Running` and reaching a terminal state (or now).
    pub fn running_duration(&self) -> Option<chrono::Duration> {
        let started = self
            .state_history
            .iter()
            .find(|t| t.to_state == ProcessState::Running)?
            .timestamp;
        let ended = self
            .state_history
            .iter()
            .find(|t| t.to_state.is_terminal())
            .map(|t| t.timestamp)
            .unwrap_or_else(Utc::now);
        Some(ended - started)
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.state_history.last()
    }
}

fn describe_exit(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("reaped with exit code {}", code),
        None => "reaped after signal".to_string(),
    }
}
