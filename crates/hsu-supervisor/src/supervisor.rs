//! Supervisor - starts invocations and hands out handles.

use crate::config::SupervisorConfig;
use crate::events::{EventSink, ExecutionEvent, ExecutionEventKind, TracingEventSink};
use crate::handle::ProcessHandle;
use crate::invocation::InvocationActor;
use crate::policy::{ExecutionPolicy, RetryPolicy};
use crate::report::ResultReport;
use crate::retry::{self, RetryOutcome};
use async_trait::async_trait;
use chrono::Utc;
use hsu_common::{ExecError, ExecResult, InvocationId};
use hsu_process::{
    build_command, build_environment, resolve_program, spawn_command, ArgumentSpec, CommandPlan,
    EnvironmentSource, FileSystem, OsEnvironment, OsFileSystem, SignalTarget, SpawnFailure,
};
use hsu_process_state::ProcessStateMachine;
use hsu_resource_limits::{apply_to_command, plan_limits, UsageSampler};
use hsu_stream::{IoPump, PumpSettings, StreamBindings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the per-invocation command channel.
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Everything needed for one run.
#[derive(Debug)]
pub struct ExecRequest {
    pub spec: ArgumentSpec,
    pub bindings: StreamBindings,
    pub policy: ExecutionPolicy,
}

impl ExecRequest {
    /// Default bindings (captured output) and the given policy.
    pub fn new(spec: ArgumentSpec, policy: ExecutionPolicy) -> Self {
        Self {
            spec,
            bindings: StreamBindings::default(),
            policy,
        }
    }

    pub fn with_bindings(mut self, bindings: StreamBindings) -> Self {
        self.bindings = bindings;
        self
    }
}

/// Runs a request to completion. The seam the retry layer is written against.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, request: ExecRequest, cancel: CancellationToken) -> ExecResult<ResultReport>;
}

/// Starts and supervises external programs.
///
/// Cheap to clone; clones share collaborators and the invocation counter.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    fs: Arc<dyn FileSystem>,
    env: Arc<dyn EnvironmentSource>,
    events: Arc<dyn EventSink>,
    next_id: Arc<AtomicU64>,
}

pub struct SupervisorBuilder {
    config: SupervisorConfig,
    fs: Arc<dyn FileSystem>,
    env: Arc<dyn EnvironmentSource>,
    events: Arc<dyn EventSink>,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self {
            config: SupervisorConfig::default(),
            fs: Arc::new(OsFileSystem),
            env: Arc::new(OsEnvironment),
            events: Arc::new(TracingEventSink),
        }
    }
}

impl SupervisorBuilder {
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn environment(mut self, env: Arc<dyn EnvironmentSource>) -> Self {
        self.env = env;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Supervisor {
        Supervisor {
            config: Arc::new(self.config),
            fs: self.fs,
            env: self.env,
            events: self.events,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The configured default execution policy.
    pub fn default_policy(&self) -> ExecutionPolicy {
        self.config.execution.clone()
    }

    fn next_invocation_id(&self) -> InvocationId {
        InvocationId::new(format!("inv-{}", self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    /// Start a process and return immediately.
    ///
    /// Must be called within a tokio runtime. A spawn failure is not an
    /// error here: the handle's `wait` returns a `SpawnFailed` report.
    ///
    /// # Errors
    /// - `InvalidSpec` if the spec or policy is malformed (no OS call is made)
    pub fn start(
        &self,
        spec: ArgumentSpec,
        bindings: StreamBindings,
        policy: ExecutionPolicy,
    ) -> ExecResult<ProcessHandle> {
        self.start_with_token(spec, bindings, policy, &CancellationToken::new())
    }

    /// Start a process that is also stopped when `cancel` fires.
    pub fn start_cancellable(
        &self,
        spec: ArgumentSpec,
        bindings: StreamBindings,
        policy: ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> ExecResult<ProcessHandle> {
        self.start_with_token(spec, bindings, policy, cancel)
    }

    fn start_with_token(
        &self,
        spec: ArgumentSpec,
        bindings: StreamBindings,
        policy: ExecutionPolicy,
        parent: &CancellationToken,
    ) -> ExecResult<ProcessHandle> {
        spec.validate(self.fs.as_ref())?;
        policy.validate()?;

        let id = self.next_invocation_id();
        let started_at = Utc::now();
        let started = Instant::now();

        let environment = build_environment(
            spec.environment(),
            policy.allowed_environment_keys.as_ref(),
            self.env.as_ref(),
        );

        let program = match resolve_program(
            spec.program(),
            &environment,
            self.env.as_ref(),
            self.fs.as_ref(),
        ) {
            Ok(program) => program,
            Err(failure) => return Ok(self.spawn_failed(id, &spec, failure, started_at, started)),
        };

        let resolved = match bindings.resolve() {
            Ok(resolved) => resolved,
            Err(failure) => return Ok(self.spawn_failed(id, &spec, failure, started_at, started)),
        };

        let group = cfg!(unix) && policy.kill_process_group;
        let plan = CommandPlan::from_spec(&spec, program, environment, group);
        let mut cmd = build_command(&plan, resolved.stdin, resolved.stdout, resolved.stderr);

        let limits = plan_limits(&policy.resource_limits, id.as_str());
        if !limits.is_empty() {
            debug!(invocation_id = %id, count = limits.len(), "Applying resource limits");
            apply_to_command(&mut cmd, limits);
        }

        // The child's pipe ends are closed here once the command is dropped.
        let mut child = match spawn_command(cmd) {
            Ok(child) => child,
            Err(failure) => return Ok(self.spawn_failed(id, &spec, failure, started_at, started)),
        };

        let Some(pid) = child.id() else {
            return Err(ExecError::reap(id, "process exited before its pid was read"));
        };

        let mut state_machine = ProcessStateMachine::new(id.as_str());
        if let Err(e) = state_machine.transition_to_running(pid) {
            warn!(invocation_id = %id, error = %e, "Unexpected state transition");
        }
        let state = Arc::new(Mutex::new(state_machine));

        self.events.emit(
            ExecutionEvent::new(id.clone(), ExecutionEventKind::Spawned, Some(pid))
                .with_detail(plan.program.display().to_string()),
        );
        info!(
            invocation_id = %id,
            pid,
            program = %plan.program.display(),
            args = plan.args.len(),
            timeout_ms = ?policy.timeout.map(|t| t.as_millis() as u64),
            "Process started"
        );

        let pump = IoPump::start(
            &mut child,
            resolved.input,
            resolved.stdout_sink,
            resolved.stderr_sink,
            PumpSettings {
                invocation_id: id.clone(),
                max_output_bytes: policy.max_output_bytes,
            },
        );
        let sampler = policy
            .resource_sample_interval
            .map(|interval| UsageSampler::spawn(pid, interval));

        let escalation = if group {
            SignalTarget::Group(pid)
        } else {
            SignalTarget::Process(pid)
        };

        let cancel = parent.child_token();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let actor = InvocationActor {
            id: id.clone(),
            program: spec.program().to_string(),
            child,
            pid,
            escalation,
            pump,
            sampler,
            state: Arc::clone(&state),
            policy,
            events: Arc::clone(&self.events),
            cancel: cancel.clone(),
            started_at,
            started,
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        Ok(ProcessHandle::running(id, pid, state, cmd_tx, cancel, task))
    }

    fn spawn_failed(
        &self,
        id: InvocationId,
        spec: &ArgumentSpec,
        failure: SpawnFailure,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
    ) -> ProcessHandle {
        warn!(
            invocation_id = %id,
            program = spec.program(),
            kind = failure.kind.as_str(),
            reason = %failure.reason,
            "Spawn failed"
        );
        self.events.emit(
            ExecutionEvent::new(id.clone(), ExecutionEventKind::SpawnFailed, None)
                .with_detail(failure.to_string()),
        );

        let report = ResultReport::spawn_failed(
            id.clone(),
            spec.program(),
            failure,
            started_at,
            started.elapsed(),
        );
        ProcessHandle::spawn_failed(id, report)
    }

    /// Run to completion.
    ///
    /// # Errors
    /// - `InvalidSpec` for malformed input
    /// - `Reap` if the child's exit status could not be collected
    pub async fn run(
        &self,
        spec: ArgumentSpec,
        bindings: StreamBindings,
        policy: ExecutionPolicy,
    ) -> ExecResult<ResultReport> {
        self.start(spec, bindings, policy)?.wait(None).await
    }

    /// Run to completion, stopping the child when `cancel` fires.
    pub async fn run_cancellable(
        &self,
        spec: ArgumentSpec,
        bindings: StreamBindings,
        policy: ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> ExecResult<ResultReport> {
        self.start_cancellable(spec, bindings, policy, cancel)?
            .wait(None)
            .await
    }

    /// Run repeatedly under the configured retry policy.
    ///
    /// `make_request` is called once per attempt with the 1-based attempt number.
    pub async fn run_with_retry<F>(
        &self,
        make_request: F,
        cancel: &CancellationToken,
    ) -> ExecResult<RetryOutcome>
    where
        F: FnMut(u32) -> ExecRequest + Send,
    {
        let retry = self.config.retry.clone();
        self.run_with_retry_policy(make_request, &retry, cancel).await
    }

    pub async fn run_with_retry_policy<F>(
        &self,
        make_request: F,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> ExecResult<RetryOutcome>
    where
        F: FnMut(u32) -> ExecRequest + Send,
    {
        retry::run_with_retry(self, make_request, retry, cancel).await
    }
}

#[async_trait]
impl Execute for Supervisor {
    async fn execute(&self, request: ExecRequest, cancel: CancellationToken) -> ExecResult<ResultReport> {
        self.run_cancellable(request.spec, request.bindings, request.policy, &cancel)
            .await
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
