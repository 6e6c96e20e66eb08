//! Run-to-completion behaviour against real processes.

#![cfg(unix)]

mod common;

use common::{quick_policy, recording_supervisor};
use hsu_supervisor::{
    ArgumentSpec, ExecutionEventKind, ExecutionPolicy, InputBinding, ProcessState, RawExitStatus,
    StreamBindings, Supervisor, TerminationCause,
};
use std::time::Duration;

#[tokio::test]
async fn test_printf_hello_is_captured() {
    let (supervisor, events) = recording_supervisor();

    let report = supervisor
        .run(
            ArgumentSpec::new("printf").arg("hello"),
            StreamBindings::default(),
            ExecutionPolicy::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.termination_cause, TerminationCause::NormalExit);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.exit_status, Some(RawExitStatus::Code(0)));
    assert_eq!(report.stdout_text().as_deref(), Some("hello"));
    assert_eq!(report.stderr_text().as_deref(), Some(""));
    assert!(report.success());
    assert!(!report.forced_kill);
    assert!(report.pid.is_some());

    assert_eq!(
        events.for_invocation(&report.invocation_id)
            .iter()
            .map(|e| e.kind)
            .collect::<Vec<_>>(),
        vec![ExecutionEventKind::Spawned, ExecutionEventKind::Exited]
    );
}

#[tokio::test]
async fn test_false_is_a_normal_exit() {
    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("false"),
            StreamBindings::default(),
            ExecutionPolicy::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.termination_cause, TerminationCause::NormalExit);
    assert_eq!(report.exit_code, Some(1));
    assert!(!report.success());
}

#[tokio::test]
async fn test_shell_metacharacters_are_passed_verbatim() {
    let payload = "a; echo pwned | cat $(id) `uname` && rm -rf nothing";

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("printf").args(["%s", payload]),
            StreamBindings::default(),
            ExecutionPolicy::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().as_deref(), Some(payload));
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn test_large_echo_does_not_deadlock() {
    let input: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        Supervisor::default().run(
            ArgumentSpec::new("cat"),
            StreamBindings::default().with_stdin(InputBinding::bytes(input.clone())),
            ExecutionPolicy::default(),
        ),
    )
    .await
    .expect("cat echo should not hang")
    .unwrap();

    let stdout = report.stdout.unwrap();
    assert!(!stdout.truncated);
    assert_eq!(stdout.total_bytes, input.len() as u64);
    assert_eq!(stdout.data, input);
}

#[tokio::test]
async fn test_output_cap_truncates_exactly() {
    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("head").args(["-c", "100000", "/dev/zero"]),
            StreamBindings::default(),
            ExecutionPolicy::default().with_max_output_bytes(1000),
        )
        .await
        .unwrap();

    let stdout = report.stdout.as_ref().unwrap();
    assert!(stdout.truncated);
    assert_eq!(stdout.data.len(), 1000);
    assert_eq!(stdout.total_bytes, 100_000);
    assert!(report.is_truncated());
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn test_wait_twice_returns_identical_report() {
    let supervisor = Supervisor::default();
    let mut handle = supervisor
        .start(
            ArgumentSpec::new("sh").args(["-c", "printf once; exit 7"]),
            StreamBindings::default(),
            ExecutionPolicy::default(),
        )
        .unwrap();

    let first = handle.wait(None).await.unwrap();
    let second = handle.wait(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.exit_code, Some(7));
    assert_eq!(first.stdout_text().as_deref(), Some("once"));
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_state_history_after_exit() {
    let supervisor = Supervisor::default();
    let mut handle = supervisor
        .start(
            ArgumentSpec::new("true"),
            StreamBindings::default(),
            ExecutionPolicy::default(),
        )
        .unwrap();

    assert!(handle.pid().is_some());
    handle.wait(None).await.unwrap();

    assert_eq!(handle.state(), ProcessState::Exited);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.exit_code, Some(0));
    assert_eq!(snapshot.pid, handle.pid());

    let path: Vec<_> = handle.history().iter().map(|t| t.to_state).collect();
    assert_eq!(path, vec![ProcessState::Running, ProcessState::Exited]);
}

#[tokio::test]
async fn test_invocation_ids_are_unique() {
    let supervisor = Supervisor::default();
    let a = supervisor
        .run(ArgumentSpec::new("true"), StreamBindings::default(), ExecutionPolicy::default())
        .await
        .unwrap();
    let b = supervisor
        .run(ArgumentSpec::new("true"), StreamBindings::default(), ExecutionPolicy::default())
        .await
        .unwrap();

    assert_ne!(a.invocation_id, b.invocation_id);
}

#[tokio::test]
async fn test_grandchild_holding_pipe_is_bounded_by_drain_timeout() {
    let started = std::time::Instant::now();

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("sh").args(["-c", "sleep 3 & printf done"]),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.exit_code, Some(0));
    let stdout = report.stdout.as_ref().unwrap();
    assert_eq!(stdout.text(), "done");
    assert!(stdout.truncated);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_open_file_limit_is_applied() {
    use hsu_supervisor::ResourceLimits;

    let limits = ResourceLimits {
        max_open_files: Some(64),
        ..Default::default()
    };

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("sh").args(["-c", "ulimit -n"]),
            StreamBindings::default(),
            ExecutionPolicy::default().with_resource_limits(limits),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().unwrap().trim(), "64");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_resource_usage_is_sampled() {
    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("sleep").arg("0.5"),
            StreamBindings::default(),
            ExecutionPolicy::default().with_resource_sampling(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let usage = report.resource_usage.expect("usage should be sampled");
    assert!(usage.samples > 0);
}
