//! Lifecycle events emitted for every invocation.

use chrono::{DateTime, Utc};
use hsu_common::InvocationId;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventKind {
    Spawned,
    SpawnFailed,
    TimedOut,
    Cancelled,
    Killed,
    Exited,
}

impl ExecutionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionEventKind::Spawned => "spawned",
            ExecutionEventKind::SpawnFailed => "spawn_failed",
            ExecutionEventKind::TimedOut => "timed_out",
            ExecutionEventKind::Cancelled => "cancelled",
            ExecutionEventKind::Killed => "killed",
            ExecutionEventKind::Exited => "exited",
        }
    }
}

impl fmt::Display for ExecutionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub invocation_id: InvocationId,
    pub kind: ExecutionEventKind,
    pub pid: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

impl ExecutionEvent {
    pub fn new(invocation_id: InvocationId, kind: ExecutionEventKind, pid: Option<u32>) -> Self {
        Self {
            invocation_id,
            kind,
            pid,
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receives lifecycle events. Called from the invocation task, so
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ExecutionEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.kind {
            ExecutionEventKind::SpawnFailed | ExecutionEventKind::Killed => warn!(
                invocation_id = %event.invocation_id,
                pid = ?event.pid,
                event = event.kind.as_str(),
                detail,
                "Execution event"
            ),
            _ => info!(
                invocation_id = %event.invocation_id,
                pid = ?event.pid,
                event = event.kind.as_str(),
                detail,
                "Execution event"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<ExecutionEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Events belonging to one invocation, in emission order.
    pub fn for_invocation(&self, id: &InvocationId) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.invocation_id == id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        let a = InvocationId::from("inv-1");
        let b = InvocationId::from("inv-2");

        sink.emit(ExecutionEvent::new(a.clone(), ExecutionEventKind::Spawned, Some(42)));
        sink.emit(ExecutionEvent::new(b.clone(), ExecutionEventKind::SpawnFailed, None).with_detail("nope"));
        sink.emit(ExecutionEvent::new(a.clone(), ExecutionEventKind::Exited, Some(42)));

        assert_eq!(
            sink.kinds(),
            vec![
                ExecutionEventKind::Spawned,
                ExecutionEventKind::SpawnFailed,
                ExecutionEventKind::Exited
            ]
        );
        assert_eq!(sink.for_invocation(&a).len(), 2);
        assert_eq!(sink.for_invocation(&b)[0].detail.as_deref(), Some("nope"));

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
