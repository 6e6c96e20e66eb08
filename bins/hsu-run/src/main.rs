use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

use hsu_supervisor::{
    parse_duration, ArgumentSpec, CancellationToken, ExecRequest, InputBinding,
    ResultReport, SpawnFailureKind, StreamBinding, StreamBindings, Supervisor, SupervisorConfig,
    TerminationCause,
};

/// Run a program under supervision
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop the program after this long (e.g. 500ms, 30s, 2m)
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Delay between SIGTERM and SIGKILL
    #[arg(long, value_parser = parse_duration)]
    grace: Option<Duration>,

    /// Cap per captured stream
    #[arg(long, value_name = "BYTES")]
    max_output: Option<usize>,

    /// Inherited environment variable to keep (repeatable); others are dropped
    #[arg(long = "allow-env", value_name = "KEY")]
    allow_env: Vec<String>,

    /// Extra environment variable for the program (repeatable)
    #[arg(short, long = "env", value_name = "K=V", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Working directory (absolute)
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Feed the program's stdin from this file
    #[arg(long, value_name = "PATH")]
    stdin_file: Option<PathBuf>,

    /// Capture output and print it after the program ends
    #[arg(long)]
    capture: bool,

    /// Print the result report as JSON
    #[arg(long)]
    json: bool,

    /// Retry failed runs this many times
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Program and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "PROGRAM")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    let code = run(args).await?;
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => {
            debug!("Config file: {}", path.display());
            SupervisorConfig::load_from_file(path)?
        }
        None => SupervisorConfig::default(),
    };

    if let Some(retries) = args.retries {
        config.retry.max_attempts = retries.saturating_add(1);
    }

    let mut policy = config.execution.clone();
    if let Some(timeout) = args.timeout {
        policy.timeout = Some(timeout);
    }
    if let Some(grace) = args.grace {
        policy.termination_grace_period = grace;
    }
    if let Some(max_output) = args.max_output {
        policy.max_output_bytes = Some(max_output);
    }
    if !args.allow_env.is_empty() {
        policy.allowed_environment_keys = Some(args.allow_env.iter().cloned().collect());
    }

    policy.validate().context("Invalid execution policy")?;

    let (program, program_args) = args
        .command
        .split_first()
        .context("No program given")?;
    let mut spec = ArgumentSpec::new(program.clone())
        .args(program_args.iter().cloned())
        .envs(args.env.iter().cloned());
    if let Some(cwd) = &args.cwd {
        spec = spec.current_dir(cwd);
    }

    let supervisor = Supervisor::new(config);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let capture = args.capture || args.json;
    let stdin_file = args.stdin_file.clone();
    let make_request = move |attempt: u32| {
        if attempt > 1 {
            info!(attempt, "Starting another attempt");
        }
        ExecRequest::new(spec.clone(), policy.clone()).with_bindings(bindings(capture, stdin_file.as_ref()))
    };

    let outcome = supervisor
        .run_with_retry(make_request, &cancel)
        .await
        .context("Execution failed")?;

    if outcome.attempts > 1 {
        info!(
            attempts = outcome.attempts,
            previous = ?outcome.previous_causes,
            "Finished after retries"
        );
    }

    let report = outcome.report;
    print_report(&report, args.capture, args.json)?;

    Ok(exit_code(&report))
}

fn bindings(capture: bool, stdin_file: Option<&PathBuf>) -> StreamBindings {
    let stdin = match stdin_file {
        Some(path) => InputBinding::file(path),
        None => StreamBinding::Inherit,
    };

    if capture {
        StreamBindings::default().with_stdin(stdin)
    } else {
        StreamBindings::inherit().with_stdin(stdin)
    }
}

fn print_report(report: &ResultReport, raw_output: bool, json: bool) -> Result<()> {
    if let TerminationCause::SpawnFailed(failure) = &report.termination_cause {
        error!(program = %report.program, "{}", failure);
        eprintln!("hsu-run: {}: {}", report.program, failure.reason);
    }

    if json {
        let rendered = serde_json::to_string_pretty(report).context("Failed to render report")?;
        println!("{}", rendered);
    } else if raw_output {
        if let Some(stdout) = &report.stdout {
            std::io::stdout().write_all(&stdout.data)?;
            std::io::stdout().flush()?;
        }
        if let Some(stderr) = &report.stderr {
            std::io::stderr().write_all(&stderr.data)?;
        }
    }

    if report.is_truncated() {
        eprintln!("hsu-run: warning: captured output was truncated");
    }

    match &report.termination_cause {
        TerminationCause::TimedOut => eprintln!(
            "hsu-run: {} timed out after {:.1}s",
            report.program,
            report.duration.as_secs_f64()
        ),
        TerminationCause::Cancelled => eprintln!("hsu-run: {} cancelled", report.program),
        _ => {}
    }

    Ok(())
}

/// Shell-style exit status for a report.
fn exit_code(report: &ResultReport) -> i32 {
    match &report.termination_cause {
        TerminationCause::NormalExit => report.exit_code.unwrap_or(0),
        TerminationCause::TimedOut => 124,
        TerminationCause::Cancelled => 130,
        TerminationCause::SignalTerminated { signal } => 128 + signal,
        TerminationCause::SpawnFailed(failure) => match failure.kind {
            SpawnFailureKind::NotFound => 127,
            SpawnFailureKind::PermissionDenied => 126,
            _ => 125,
        },
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "warn" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal;

    #[cfg(unix)]
    {
        let handlers = signal::unix::signal(signal::unix::SignalKind::terminate()).and_then(|term| {
            signal::unix::signal(signal::unix::SignalKind::interrupt()).map(|int| (term, int))
        });
        let (mut sigterm, mut sigint) = match handlers {
            Ok(handlers) => handlers,
            Err(e) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }

    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsu_supervisor::{InvocationId, SpawnFailure};

    fn report(cause: TerminationCause, exit_code: Option<i32>) -> ResultReport {
        ResultReport {
            invocation_id: InvocationId::from("inv-1"),
            program: "prog".into(),
            pid: Some(1),
            exit_code,
            exit_status: None,
            termination_cause: cause,
            stdout: None,
            stderr: None,
            started_at: chrono::Utc::now(),
            duration: Duration::ZERO,
            forced_kill: false,
            stream_errors: Vec::new(),
            resource_usage: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&report(TerminationCause::NormalExit, Some(3))), 3);
        assert_eq!(exit_code(&report(TerminationCause::TimedOut, None)), 124);
        assert_eq!(exit_code(&report(TerminationCause::Cancelled, None)), 130);
        assert_eq!(
            exit_code(&report(TerminationCause::SignalTerminated { signal: 9 }, None)),
            137
        );

        let missing = TerminationCause::SpawnFailed(SpawnFailure::not_found("nope"));
        assert_eq!(exit_code(&report(missing, None)), 127);
        let denied = TerminationCause::SpawnFailed(SpawnFailure::new(
            SpawnFailureKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(exit_code(&report(denied, None)), 126);
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }

    #[test]
    fn test_args_parse_trailing_command() {
        let args = Args::try_parse_from([
            "hsu-run", "--timeout", "2s", "--env", "A=1", "--capture", "--", "ls", "-la", "/tmp",
        ])
        .unwrap();

        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
        assert!(args.capture);
        assert_eq!(args.command, vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_args_require_program() {
        assert!(Args::try_parse_from(["hsu-run", "--json"]).is_err());
    }
}
