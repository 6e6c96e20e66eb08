//! Applying resource limits to a child at spawn time.
//!
//! Planning happens in the parent (where logging is safe); the child only
//! runs `setrlimit` calls between fork and exec.

use crate::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use tracing::{debug, warn};

/// Kind of OS resource limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    CpuTime,
    AddressSpace,
    Processes,
    OpenFiles,
    CoreDumps,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::CpuTime => write!(f, "cpu_time"),
            LimitKind::AddressSpace => write!(f, "address_space"),
            LimitKind::Processes => write!(f, "processes"),
            LimitKind::OpenFiles => write!(f, "open_files"),
            LimitKind::CoreDumps => write!(f, "core_dumps"),
        }
    }
}

/// A limit that will be set in the child, after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLimit {
    pub kind: LimitKind,
    pub value: u64,
    /// True when the requested value exceeded the hard limit.
    pub clamped: bool,
}

/// Work out which limits can be applied on this platform.
///
/// Unsupported kinds are logged and skipped. Values above the current hard
/// limit are lowered to it and logged.
pub fn plan_limits(limits: &ResourceLimits, invocation_id: &str) -> Vec<PlannedLimit> {
    let mut planned = Vec::new();

    for (kind, requested) in limits.requested() {
        let Some(hard) = platform::hard_limit(kind) else {
            warn!(
                invocation_id,
                limit = %kind,
                "Resource limit not supported on this platform, skipping"
            );
            continue;
        };

        let (value, clamped) = match hard {
            Some(hard) if requested > hard => {
                warn!(
                    invocation_id,
                    limit = %kind,
                    requested,
                    hard_limit = hard,
                    "Requested resource limit exceeds hard limit, clamping"
                );
                (hard, true)
            }
            _ => (requested, false),
        };

        debug!(invocation_id, limit = %kind, value, "Planned resource limit");
        planned.push(PlannedLimit {
            kind,
            value,
            clamped,
        });
    }

    planned
}

/// Arrange for the planned limits to be set in the child before exec.
///
/// Failures inside the child are ignored: limits are best-effort and must
/// never prevent the program from starting.
pub fn apply_to_command(cmd: &mut Command, planned: Vec<PlannedLimit>) {
    if planned.is_empty() {
        return;
    }
    platform::install(cmd, planned);
}

#[cfg(unix)]
mod platform {
    use super::{LimitKind, PlannedLimit};
    use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};
    use std::process::Command;

    fn resource(kind: LimitKind) -> Option<Resource> {
        match kind {
            LimitKind::CpuTime => Some(Resource::RLIMIT_CPU),
            LimitKind::OpenFiles => Some(Resource::RLIMIT_NOFILE),
            LimitKind::CoreDumps => Some(Resource::RLIMIT_CORE),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitKind::AddressSpace => Some(Resource::RLIMIT_AS),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitKind::Processes => Some(Resource::RLIMIT_NPROC),
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            LimitKind::AddressSpace | LimitKind::Processes => None,
        }
    }

    /// `None` when unsupported; `Some(None)` when the hard limit is unlimited.
    pub(super) fn hard_limit(kind: LimitKind) -> Option<Option<u64>> {
        let resource = resource(kind)?;
        match getrlimit(resource) {
            Ok((_, hard)) if hard == RLIM_INFINITY => Some(None),
            Ok((_, hard)) => Some(Some(hard as u64)),
            Err(e) => {
                tracing::debug!(limit = %kind, error = %e, "getrlimit failed, not clamping");
                Some(None)
            }
        }
    }

    pub(super) fn install(cmd: &mut Command, planned: Vec<PlannedLimit>) {
        use std::os::unix::process::CommandExt;

        let resolved: Vec<(Resource, nix::libc::rlim_t)> = planned
            .iter()
            .filter_map(|limit| {
                resource(limit.kind).map(|r| (r, limit.value as nix::libc::rlim_t))
            })
            .collect();

        // Runs between fork and exec: only async-signal-safe calls, no allocation.
        unsafe {
            cmd.pre_exec(move || {
                for (resource, value) in &resolved {
                    let _ = setrlimit(*resource, *value, *value);
                }
                Ok(())
            });
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::{LimitKind, PlannedLimit};
    use std::process::Command;

    pub(super) fn hard_limit(_kind: LimitKind) -> Option<Option<u64>> {
        None
    }

    pub(super) fn install(_cmd: &mut Command, _planned: Vec<PlannedLimit>) {}
}
