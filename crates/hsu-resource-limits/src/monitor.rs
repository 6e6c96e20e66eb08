//! Resource usage sampling for a running child.

use hsu_common::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resource usage of a process at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub file_descriptors: Option<u32>,
}

/// Peak usage observed over the lifetime of a child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub samples: u32,
    pub peak_memory_bytes: u64,
    pub peak_cpu_percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_file_descriptors: Option<u32>,
}

impl UsageSummary {
    fn record(&mut self, usage: &ResourceUsage) {
        self.samples += 1;
        self.peak_memory_bytes = self.peak_memory_bytes.max(usage.memory_bytes);
        self.peak_cpu_percent = self.peak_cpu_percent.max(usage.cpu_percent);
        if let Some(fds) = usage.file_descriptors {
            self.peak_file_descriptors = Some(self.peak_file_descriptors.unwrap_or(0).max(fds));
        }
    }
}

/// Reads per-process usage from the OS.
pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Current usage for `pid`. CPU usage is relative to the previous sample,
    /// so the first reading for a pid is usually zero.
    pub fn sample(&mut self, pid: u32) -> ProcessResult<ResourceUsage> {
        let sysinfo_pid = Pid::from_u32(pid);
        // Refresh only what we read; a bare refresh returns stale data.
        self.system.refresh_process_specifics(
            sysinfo_pid,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        let process = self
            .system
            .process(sysinfo_pid)
            .ok_or_else(|| ProcessError::not_found(pid))?;

        Ok(ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            file_descriptors: fd_count(pid),
        })
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn fd_count(pid: u32) -> Option<u32> {
    std::fs::read_dir(format!("/proc/{}/fd", pid))
        .ok()
        .map(|entries| entries.count() as u32)
}

#[cfg(not(target_os = "linux"))]
fn fd_count(_pid: u32) -> Option<u32> {
    None
}

/// Background task sampling one pid at a fixed interval until stopped.
pub struct UsageSampler {
    stop: CancellationToken,
    task: JoinHandle<UsageSummary>,
}

impl UsageSampler {
    pub fn spawn(pid: u32, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let task = tokio::spawn(async move {
            let mut monitor = ResourceMonitor::new();
            let mut summary = UsageSummary::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match monitor.sample(pid) {
                            Ok(usage) => summary.record(&usage),
                            Err(_) => {
                                debug!(pid, "Process gone, stopping usage sampling");
                                break;
                            }
                        }
                    }
                }
            }

            summary
        });

        Self { stop, task }
    }

    /// Stop sampling and return the summary. `None` if no sample was taken.
    pub async fn finish(self) -> Option<UsageSummary> {
        self.stop.cancel();
        match self.task.await {
            Ok(summary) if summary.samples > 0 => Some(summary),
            _ => None,
        }
    }
}
