//! # HSU Resource Limits
//!
//! Resource limits and usage sampling for supervised processes.
//!
//! This crate provides:
//! - Best-effort OS resource limits applied to a child at spawn time
//! - Periodic resource usage sampling (memory, CPU, file descriptors)
//!
//! Limits are advisory to the caller: a value above the current hard limit
//! is clamped, a limit kind the platform lacks is skipped, and in both
//! cases the spawn proceeds.

pub mod apply;
pub mod monitor;

use serde::{Deserialize, Serialize};

pub use apply::{apply_to_command, plan_limits, LimitKind, PlannedLimit};
pub use monitor::{ResourceMonitor, ResourceUsage, UsageSampler, UsageSummary};

/// Resource limits requested for one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum CPU time in seconds (RLIMIT_CPU)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time_secs: Option<u64>,

    /// Maximum address space in bytes (RLIMIT_AS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,

    /// Maximum number of processes for the user (RLIMIT_NPROC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<u64>,

    /// Maximum open file descriptors (RLIMIT_NOFILE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_open_files: Option<u64>,

    /// Suppress core dumps (RLIMIT_CORE = 0)
    #[serde(default)]
    pub disable_core_dumps: bool,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.cpu_time_secs.is_none()
            && self.memory_bytes.is_none()
            && self.max_processes.is_none()
            && self.max_open_files.is_none()
            && !self.disable_core_dumps
    }

    /// The requested limits as `(kind, value)` pairs, in a fixed order.
    pub fn requested(&self) -> Vec<(LimitKind, u64)> {
        let mut requested = Vec::new();
        if let Some(secs) = self.cpu_time_secs {
            requested.push((LimitKind::CpuTime, secs));
        }
        if let Some(bytes) = self.memory_bytes {
            requested.push((LimitKind::AddressSpace, bytes));
        }
        if let Some(count) = self.max_processes {
            requested.push((LimitKind::Processes, count));
        }
        if let Some(count) = self.max_open_files {
            requested.push((LimitKind::OpenFiles, count));
        }
        if self.disable_core_dumps {
            requested.push((LimitKind::CoreDumps, 0));
        }
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_limits() {
        assert!(ResourceLimits::default().is_empty());
        assert!(ResourceLimits::default().requested().is_empty());
    }

    #[test]
    fn test_requested_order() {
        let limits = ResourceLimits {
            cpu_time_secs: Some(10),
            max_open_files: Some(64),
            disable_core_dumps: true,
            ..Default::default()
        };
        assert_eq!(
            limits.requested(),
            vec![
                (LimitKind::CpuTime, 10),
                (LimitKind::OpenFiles, 64),
                (LimitKind::CoreDumps, 0),
            ]
        );
    }

    #[test]
    fn test_limits_from_yaml() {
        let yaml = "memory_bytes: 1048576\ndisable_core_dumps: true\n";
        let limits: ResourceLimits = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(limits.memory_bytes, Some(1_048_576));
        assert!(limits.disable_core_dumps);
        assert_eq!(limits.cpu_time_secs, None);
    }
}
