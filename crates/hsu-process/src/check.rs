//! Process existence checking.

use crate::terminate::SignalTarget;
use hsu_common::ProcessResult;

/// Check whether a process, or any member of a process group, is alive.
///
/// Performs a non-destructive probe: on Unix this is `kill(pid, 0)` (or
/// `killpg(pgid, 0)`), which delivers nothing but reports existence. A
/// process we may not signal still exists.
///
/// ```rust,no_run
/// use hsu_process::{process_exists, SignalTarget};
///
/// if process_exists(SignalTarget::Group(4242)).unwrap_or(false) {
///     println!("group 4242 still has members");
/// }
/// ```
#[cfg(unix)]
pub fn process_exists(target: SignalTarget) -> ProcessResult<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let pid = target.pid();
    let nix_pid = Pid::from_raw(pid as i32);

    let probe = match target {
        SignalTarget::Process(_) => kill(nix_pid, None),
        SignalTarget::Group(_) => killpg(nix_pid, None),
    };

    match probe {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(hsu_common::ProcessError::check_failed(pid, e.desc())),
    }
}

#[cfg(not(unix))]
pub fn process_exists(target: SignalTarget) -> ProcessResult<bool> {
    Err(hsu_common::ProcessError::check_failed(
        target.pid(),
        "existence checks are not supported on this platform",
    ))
}
