//! Core domain types shared by the execution crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Invocation identifier - uniquely identifies one supervised run.
///
/// Every log line and event emitted for a run carries this id.
///
/// # Example
/// ```
/// use hsu_common::InvocationId;
///
/// let id = InvocationId::from("inv-7");
/// assert_eq!(id.as_str(), "inv-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(String);

impl InvocationId {
    /// Creates a new InvocationId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InvocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InvocationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signals a caller may deliver to a supervised process.
///
/// The set is closed on purpose: only signals with a well-defined meaning
/// across Unix platforms are offered. `Terminate` and `Kill` are the two the
/// supervisor itself uses for escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Graceful termination request (SIGTERM).
    Terminate,
    /// Forced termination (SIGKILL). Cannot be caught or ignored.
    Kill,
    /// Interrupt (SIGINT), what a terminal sends on Ctrl-C.
    Interrupt,
    /// Hangup (SIGHUP), commonly used to request a configuration reload.
    Hangup,
    /// Quit (SIGQUIT).
    Quit,
    /// User-defined signal 1 (SIGUSR1).
    User1,
    /// User-defined signal 2 (SIGUSR2).
    User2,
    /// Stop (SIGSTOP). Suspends the process.
    Stop,
    /// Continue (SIGCONT). Resumes a stopped process.
    Continue,
}

impl SignalKind {
    /// Returns the conventional signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Kill => "SIGKILL",
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::Quit => "SIGQUIT",
            SignalKind::User1 => "SIGUSR1",
            SignalKind::User2 => "SIGUSR2",
            SignalKind::Stop => "SIGSTOP",
            SignalKind::Continue => "SIGCONT",
        }
    }

    /// Parses a signal name, with or without the `SIG` prefix, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "TERM" => Some(SignalKind::Terminate),
            "KILL" => Some(SignalKind::Kill),
            "INT" => Some(SignalKind::Interrupt),
            "HUP" => Some(SignalKind::Hangup),
            "QUIT" => Some(SignalKind::Quit),
            "USR1" => Some(SignalKind::User1),
            "USR2" => Some(SignalKind::User2),
            "STOP" => Some(SignalKind::Stop),
            "CONT" => Some(SignalKind::Continue),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
