//! Process termination primitives.
//!
//! Signal delivery to a single process or to a whole process group.

use hsu_common::{ProcessError, ProcessResult, SignalKind};
use tracing::debug;

/// Who receives a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// Only the process with this pid.
    Process(u32),
    /// Every process in the group led by this pid.
    Group(u32),
}

impl SignalTarget {
    pub fn pid(&self) -> u32 {
        match self {
            SignalTarget::Process(pid) | SignalTarget::Group(pid) => *pid,
        }
    }
}

/// True when the platform can ask a process to exit before killing it.
pub fn supports_graceful_termination() -> bool {
    cfg!(unix)
}

/// Deliver `kind` to `target`.
///
/// A target that no longer exists is reported as `ProcessError::NotFound`
/// so callers can treat a lost race with process exit as benign.
#[cfg(unix)]
pub fn send_signal(target: SignalTarget, kind: SignalKind) -> ProcessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let signal = to_nix_signal(kind);
    let pid = target.pid();
    let nix_pid = Pid::from_raw(pid as i32);

    debug!(?target, signal = kind.as_str(), "Sending signal");

    let result = match target {
        SignalTarget::Process(_) => kill(nix_pid, signal),
        SignalTarget::Group(_) => killpg(nix_pid, signal),
    };

    result.map_err(|errno| match errno {
        Errno::ESRCH => ProcessError::not_found(pid),
        other => ProcessError::signal_failed(pid, kind, other.desc()),
    })
}

#[cfg(not(unix))]
pub fn send_signal(_target: SignalTarget, kind: SignalKind) -> ProcessResult<()> {
    Err(ProcessError::unsupported(kind))
}

/// Ask the target to exit (SIGTERM).
pub fn terminate_gracefully(target: SignalTarget) -> ProcessResult<()> {
    send_signal(target, SignalKind::Terminate)
}

/// Force the target to exit (SIGKILL).
pub fn force_kill(target: SignalTarget) -> ProcessResult<()> {
    send_signal(target, SignalKind::Kill)
}

/// Numeric value of a signal on this platform.
#[cfg(unix)]
pub fn signal_number(kind: SignalKind) -> Option<i32> {
    Some(to_nix_signal(kind) as i32)
}

#[cfg(not(unix))]
pub fn signal_number(_kind: SignalKind) -> Option<i32> {
    None
}

/// Conventional name for a raw signal number, if known.
#[cfg(unix)]
pub fn signal_name(number: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(number)
        .ok()
        .map(|signal| signal.as_str())
}

#[cfg(not(unix))]
pub fn signal_name(_number: i32) -> Option<&'static str> {
    None
}

#[cfg(unix)]
fn to_nix_signal(kind: SignalKind) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match kind {
        SignalKind::Terminate => Signal::SIGTERM,
        SignalKind::Kill => Signal::SIGKILL,
        SignalKind::Interrupt => Signal::SIGINT,
        SignalKind::Hangup => Signal::SIGHUP,
        SignalKind::Quit => Signal::SIGQUIT,
        SignalKind::User1 => Signal::SIGUSR1,
        SignalKind::User2 => Signal::SIGUSR2,
        SignalKind::Stop => Signal::SIGSTOP,
        SignalKind::Continue => Signal::SIGCONT,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_signal_numbers() {
        assert_eq!(signal_number(SignalKind::Kill), Some(9));
        assert_eq!(signal_number(SignalKind::Terminate), Some(15));
        assert_eq!(signal_name(15), Some("SIGTERM"));
        assert_eq!(signal_name(0), None);
    }

    #[test]
    fn test_signal_to_exited_process_is_not_found() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let err = send_signal(SignalTarget::Process(pid), SignalKind::Terminate).unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[test]
    fn test_force_kill_group() {
        use std::os::unix::process::CommandExt;

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();

        force_kill(SignalTarget::Group(child.id())).unwrap();
        let status = child.wait().unwrap();

        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(9));
    }
}
