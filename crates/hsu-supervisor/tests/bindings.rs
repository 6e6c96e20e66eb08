//! Stream bindings, environment, working directory and spawn failures.

#![cfg(unix)]

mod common;

use common::{quick_policy, recording_supervisor, FixedEnvironment};
use hsu_supervisor::{
    ArgumentSpec, ControlError, Environment, ExecError, ExecutionEventKind, InputBinding, OutputBinding,
    SignalKind, SpawnFailureKind, StreamBinding, StreamBindings, Supervisor, TerminationCause,
};
use std::sync::Arc;

#[tokio::test]
async fn test_stdout_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("printf").arg("abc"),
            StreamBindings::default().with_stdout(OutputBinding::file(&path)),
            quick_policy(),
        )
        .await
        .unwrap();

    assert!(report.stdout.is_none());
    assert!(report.stderr.is_some());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc");
}

#[tokio::test]
async fn test_append_file_keeps_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    std::fs::write(&path, "first\n").unwrap();

    Supervisor::default()
        .run(
            ArgumentSpec::new("printf").arg("second\n"),
            StreamBindings::default().with_stdout(OutputBinding::append_file(&path)),
            quick_policy(),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
}

#[tokio::test]
async fn test_stdin_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.txt");
    std::fs::write(&path, "from file").unwrap();

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("cat"),
            StreamBindings::default().with_stdin(InputBinding::file(&path)),
            quick_policy(),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().as_deref(), Some("from file"));
}

#[tokio::test]
async fn test_stdin_from_reader() {
    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("cat"),
            StreamBindings::default().with_stdin(InputBinding::reader(&b"streamed"[..])),
            quick_policy(),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().as_deref(), Some("streamed"));
}

#[tokio::test]
async fn test_discarded_streams_are_not_reported() {
    let bindings = StreamBindings::default()
        .with_stdout(StreamBinding::Discard)
        .with_stderr(StreamBinding::Discard);

    let report = Supervisor::default()
        .run(ArgumentSpec::new("printf").arg("gone"), bindings, quick_policy())
        .await
        .unwrap();

    assert!(report.stdout.is_none());
    assert!(report.stderr.is_none());
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn test_missing_stdin_file_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("cat"),
            StreamBindings::default().with_stdin(InputBinding::file(dir.path().join("missing"))),
            quick_policy(),
        )
        .await
        .unwrap();

    match report.termination_cause {
        TerminationCause::SpawnFailed(failure) => assert_eq!(failure.kind, SpawnFailureKind::Binding),
        other => panic!("expected spawn failure, got {:?}", other),
    }
    assert!(report.pid.is_none());
}

#[tokio::test]
async fn test_missing_program_is_not_found() {
    let (supervisor, events) = recording_supervisor();

    let mut handle = supervisor
        .start(
            ArgumentSpec::new("definitely-not-a-real-program-7f3a"),
            StreamBindings::default(),
            quick_policy(),
        )
        .unwrap();

    assert!(handle.pid().is_none());
    let err = handle.signal(SignalKind::Terminate).await.unwrap_err();
    assert!(matches!(err, ControlError::NotStarted { .. }));
    let err = handle.controller().signal(SignalKind::Kill).await.unwrap_err();
    assert!(matches!(err, ControlError::NotStarted { .. }));

    let report = handle.wait(None).await.unwrap();
    match &report.termination_cause {
        TerminationCause::SpawnFailed(failure) => assert_eq!(failure.kind, SpawnFailureKind::NotFound),
        other => panic!("expected spawn failure, got {:?}", other),
    }
    assert!(report.exit_code.is_none());
    assert!(report.stdout.is_none());
    assert_eq!(events.kinds(), vec![ExecutionEventKind::SpawnFailed]);
}

#[tokio::test]
async fn test_non_executable_file_is_permission_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-executable");
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new(path.to_string_lossy()),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    match report.termination_cause {
        TerminationCause::SpawnFailed(failure) => {
            assert_eq!(failure.kind, SpawnFailureKind::PermissionDenied)
        }
        other => panic!("expected spawn failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_working_directory() {
    let dir = tempfile::tempdir().unwrap();

    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("pwd").current_dir(dir.path()),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    let printed = report.stdout_text().unwrap();
    assert_eq!(
        std::fs::canonicalize(printed.trim()).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
}

#[tokio::test]
async fn test_invalid_working_directory_is_rejected_before_spawn() {
    let (supervisor, events) = recording_supervisor();
    let dir = tempfile::tempdir().unwrap();

    let err = supervisor
        .run(
            ArgumentSpec::new("true").current_dir(dir.path().join("missing")),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::InvalidSpec { .. }));

    let err = supervisor
        .run(
            ArgumentSpec::new("true").current_dir("relative/dir"),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_environment_allow_list() {
    let env = FixedEnvironment::with_path(&[("HOME", "/home/tester"), ("SECRET", "hunter2")]);
    let supervisor = Supervisor::builder().environment(Arc::new(env)).build();

    let report = supervisor
        .run(
            ArgumentSpec::new("sh")
                .args(["-c", r#"printf '%s|%s|%s' "$HOME" "$SECRET" "$EXTRA""#])
                .env("EXTRA", "set"),
            StreamBindings::default(),
            quick_policy().with_allowed_environment_keys(["PATH", "HOME"]),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().as_deref(), Some("/home/tester||set"));
}

#[tokio::test]
async fn test_environment_removal() {
    let env = FixedEnvironment::with_path(&[("DROP_ME", "x"), ("KEEP_ME", "y")]);
    let supervisor = Supervisor::builder().environment(Arc::new(env)).build();

    let report = supervisor
        .run(
            ArgumentSpec::new("sh")
                .args(["-c", r#"printf '%s|%s' "$DROP_ME" "$KEEP_ME""#])
                .env_remove("DROP_ME"),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout_text().as_deref(), Some("|y"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_arg0_is_visible_to_child() {
    let report = Supervisor::default()
        .run(
            ArgumentSpec::new("sh")
                .arg0("custom-name")
                .args(["-c", "cat /proc/$$/cmdline; exit 0"]),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    let cmdline = report.stdout.unwrap().data;
    assert!(cmdline.starts_with(b"custom-name\0"));
}

#[tokio::test]
async fn test_non_unicode_environment_reaches_child() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let env = FixedEnvironment::with_path(&[])
        .with("RAW_VALUE", OsString::from_vec(b"a\xffb".to_vec()));
    let supervisor = Supervisor::builder().environment(Arc::new(env)).build();

    let report = supervisor
        .run(
            ArgumentSpec::new("sh").args(["-c", r#"printf %s "${RAW_VALUE-UNSET}""#]),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();

    assert_eq!(report.stdout.unwrap().data, b"a\xffb".to_vec());
}

#[tokio::test]
async fn test_program_lookup_uses_injected_path() {
    use std::ffi::OsString;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let tool = dir.path().join("hsu-test-tool");
    std::fs::write(&tool, "#!/bin/sh\nprintf found\n").unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let env = FixedEnvironment(Environment::from([(
        OsString::from("PATH"),
        dir.path().as_os_str().to_owned(),
    )]));
    let supervisor = Supervisor::builder().environment(Arc::new(env)).build();

    // No PATH reaches the child, so lookup falls back to the caller's PATH.
    let report = supervisor
        .run(
            ArgumentSpec::new("hsu-test-tool").env_clear(),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();
    assert_eq!(report.stdout_text().as_deref(), Some("found"));

    let report = supervisor
        .run(
            ArgumentSpec::new("printf").arg("x").env_clear(),
            StreamBindings::default(),
            quick_policy(),
        )
        .await
        .unwrap();
    match report.termination_cause {
        TerminationCause::SpawnFailed(failure) => assert_eq!(failure.kind, SpawnFailureKind::NotFound),
        other => panic!("expected spawn failure, got {:?}", other),
    }
}
