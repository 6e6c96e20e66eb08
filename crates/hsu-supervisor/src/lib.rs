//! # HSU Supervisor
//!
//! Supervised execution of external programs.
//!
//! A [`Supervisor`] starts a program from a validated [`ArgumentSpec`],
//! connects its standard streams as described by [`StreamBindings`], and
//! enforces an [`ExecutionPolicy`]: timeout, output caps, environment
//! allow-list, resource limits and graceful-then-forced termination. Every
//! invocation that passes validation ends in a [`ResultReport`].
//!
//! ```rust,no_run
//! use hsu_supervisor::{ArgumentSpec, ExecutionPolicy, StreamBindings, Supervisor};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = Supervisor::default();
//! let report = supervisor
//!     .run(
//!         ArgumentSpec::new("printf").arg("hello"),
//!         StreamBindings::default(),
//!         ExecutionPolicy::default().with_timeout(Duration::from_secs(5)),
//!     )
//!     .await?;
//!
//! assert_eq!(report.stdout_text().as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod commands;
pub mod config;
pub mod events;
pub mod handle;
mod invocation;
pub mod policy;
pub mod report;
pub mod retry;
pub mod supervisor;

pub use config::{parse_duration, SupervisorConfig};
pub use events::{EventSink, ExecutionEvent, ExecutionEventKind, RecordingEventSink, TracingEventSink};
pub use handle::{ProcessController, ProcessHandle};
pub use policy::{
    ExecutionPolicy, RetryCondition, RetryPolicy, DEFAULT_GRACE_PERIOD, DEFAULT_IO_DRAIN_TIMEOUT,
};
pub use report::{RawExitStatus, ResultReport, TerminationCause};
pub use retry::{retry_condition, run_with_retry, RetryOutcome};
pub use supervisor::{ExecRequest, Execute, Supervisor, SupervisorBuilder};

// Types callers need to build requests and read reports.
pub use hsu_common::{ControlError, ExecError, ExecResult, InvocationId, SignalKind, StreamKind};
pub use hsu_process::{
    ArgumentSpec, Environment, EnvironmentSource, FileSystem, OsEnvironment, OsFileSystem,
    SpawnFailure, SpawnFailureKind,
};
pub use hsu_process_state::{ProcessState, StateSnapshot, StateTransition};
pub use hsu_resource_limits::{ResourceLimits, UsageSummary};
pub use hsu_stream::{
    CapturedOutput, InputBinding, OutputBinding, StreamBinding, StreamBindings, StreamError,
};
pub use tokio_util::sync::CancellationToken;
