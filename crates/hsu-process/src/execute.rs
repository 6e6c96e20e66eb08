//! Process execution primitives.
//!
//! Turns a validated [`ArgumentSpec`] into an OS command and spawns it.
//! The argument vector is handed to the exec call unchanged; no shell is
//! ever involved.

use crate::env::{Environment, EnvironmentSource};
use crate::fs::FileSystem;
use crate::spec::ArgumentSpec;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Why a process could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnFailureKind {
    /// The program does not exist or is not on the search path.
    NotFound,
    /// The program exists but may not be executed.
    PermissionDenied,
    /// The OS refused for lack of processes, memory or descriptors.
    ResourceExhausted,
    /// A stream binding (such as an output file) could not be set up.
    Binding,
    Other,
}

impl SpawnFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpawnFailureKind::NotFound => "not_found",
            SpawnFailureKind::PermissionDenied => "permission_denied",
            SpawnFailureKind::ResourceExhausted => "resource_exhausted",
            SpawnFailureKind::Binding => "binding",
            SpawnFailureKind::Other => "other",
        }
    }
}

/// A classified spawn failure. Reported as a result, never as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnFailure {
    pub kind: SpawnFailureKind,
    pub reason: String,
}

impl SpawnFailure {
    pub fn new(kind: SpawnFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(SpawnFailureKind::NotFound, reason)
    }

    pub fn binding(reason: impl Into<String>) -> Self {
        Self::new(SpawnFailureKind::Binding, reason)
    }
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

/// Everything needed to build the OS command for one spawn.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    /// Resolved executable path.
    pub program: PathBuf,
    /// What the child observes as `argv[0]`.
    pub argv0: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// The complete child environment. Nothing else is inherited.
    pub environment: Environment,
    /// Place the child in a fresh process group so the whole tree can be signalled.
    pub new_process_group: bool,
}

impl CommandPlan {
    pub fn from_spec(
        spec: &ArgumentSpec,
        program: PathBuf,
        environment: Environment,
        new_process_group: bool,
    ) -> Self {
        Self {
            program,
            argv0: spec.argv0().to_string(),
            args: spec.arg_list().to_vec(),
            working_directory: spec.working_directory().map(Path::to_path_buf),
            environment,
            new_process_group,
        }
    }
}

fn has_path_separator(program: &str) -> bool {
    program.contains('/') || (cfg!(windows) && program.contains('\\'))
}

/// Resolve the program to an executable path.
///
/// A program containing a path separator is used as-is. A bare name is
/// looked up on the child's `PATH` when the child environment defines one,
/// otherwise on the caller's as reported by `caller`. A bare name found
/// nowhere fails with `NotFound` before any OS process is created.
pub fn resolve_program(
    program: &str,
    child_environment: &Environment,
    caller: &dyn EnvironmentSource,
    fs: &dyn FileSystem,
) -> Result<PathBuf, SpawnFailure> {
    if has_path_separator(program) {
        return Ok(PathBuf::from(program));
    }

    let search_path: Option<OsString> = child_environment
        .get(OsStr::new("PATH"))
        .cloned()
        .or_else(|| caller.var("PATH"));

    let Some(search_path) = search_path else {
        return Err(SpawnFailure::not_found(format!(
            "{}: no search path available",
            program
        )));
    };

    match fs.resolve_on_search_path(program, &search_path) {
        Some(path) => {
            debug!(program, resolved = %path.display(), "Resolved program on search path");
            Ok(path)
        }
        None => Err(SpawnFailure::not_found(format!(
            "{}: not found on search path",
            program
        ))),
    }
}

/// Build the OS command for a plan with the given stdio handles.
///
/// The returned command has a fully explicit environment and can still be
/// customised (for example with resource limits) before spawning.
pub fn build_command(plan: &CommandPlan, stdin: Stdio, stdout: Stdio, stderr: Stdio) -> Command {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .env_clear()
        .envs(&plan.environment)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr);

    if let Some(dir) = &plan.working_directory {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        cmd.arg0(&plan.argv0);
        if plan.new_process_group {
            cmd.process_group(0);
        }
    }

    cmd
}

/// Spawn a prepared command as an async child.
///
/// The child is killed if its handle is dropped, so an abandoned
/// invocation never leaks a running process.
pub fn spawn_command(cmd: Command) -> Result<tokio::process::Child, SpawnFailure> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut cmd = tokio::process::Command::from(cmd);
    cmd.kill_on_drop(true);
    cmd.spawn().map_err(|e| classify_spawn_error(&program, &e))
}

/// Map an OS spawn error onto a [`SpawnFailure`].
pub fn classify_spawn_error(program: &str, error: &io::Error) -> SpawnFailure {
    let kind = match error.kind() {
        io::ErrorKind::NotFound => SpawnFailureKind::NotFound,
        io::ErrorKind::PermissionDenied => SpawnFailureKind::PermissionDenied,
        io::ErrorKind::OutOfMemory => SpawnFailureKind::ResourceExhausted,
        _ if is_resource_exhaustion(error) => SpawnFailureKind::ResourceExhausted,
        _ => SpawnFailureKind::Other,
    };
    SpawnFailure::new(kind, format!("{}: {}", program, error))
}

#[cfg(unix)]
fn is_resource_exhaustion(error: &io::Error) -> bool {
    use nix::errno::Errno;

    matches!(
        error.raw_os_error().map(Errno::from_i32),
        Some(Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_error: &io::Error) -> bool {
    false
}
