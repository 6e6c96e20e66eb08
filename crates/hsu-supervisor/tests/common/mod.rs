//! Shared helpers for the end-to-end supervisor tests.

#![allow(dead_code)]

use hsu_supervisor::{
    Environment, EnvironmentSource, ExecutionPolicy, RecordingEventSink, Supervisor,
};
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

/// Supervisor whose events are recorded for assertions.
pub fn recording_supervisor() -> (Supervisor, Arc<RecordingEventSink>) {
    let events = Arc::new(RecordingEventSink::new());
    let supervisor = Supervisor::builder().event_sink(events.clone()).build();
    (supervisor, events)
}

/// Default policy with short escalation so failing tests do not hang.
pub fn quick_policy() -> ExecutionPolicy {
    ExecutionPolicy::default()
        .with_grace_period(Duration::from_millis(500))
        .with_io_drain_timeout(Some(Duration::from_millis(500)))
}

/// A fixed caller environment that still lets the child find standard tools.
pub struct FixedEnvironment(pub Environment);

impl FixedEnvironment {
    pub fn with_path(vars: &[(&str, &str)]) -> Self {
        let mut env: Environment = vars
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect();
        if let Some(path) = std::env::var_os("PATH") {
            env.insert(OsString::from("PATH"), path);
        }
        Self(env)
    }

    pub fn with(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl EnvironmentSource for FixedEnvironment {
    fn current_environment(&self) -> Environment {
        self.0.clone()
    }
}
