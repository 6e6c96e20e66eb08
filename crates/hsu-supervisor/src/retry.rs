//! Caller-layer retry around whole runs.

use crate::policy::{RetryCondition, RetryPolicy};
use crate::report::{ResultReport, TerminationCause};
use crate::supervisor::{ExecRequest, Execute};
use hsu_common::ExecResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The final report plus what happened before it.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub report: ResultReport,
    /// Attempts made, including the last one.
    pub attempts: u32,
    /// Causes of the attempts that were retried, oldest first.
    pub previous_causes: Vec<TerminationCause>,
}

/// The retry condition a report matches, if any.
///
/// Successful and cancelled runs never match.
pub fn retry_condition(report: &ResultReport) -> Option<RetryCondition> {
    match &report.termination_cause {
        TerminationCause::NormalExit if report.exit_code == Some(0) => None,
        TerminationCause::NormalExit => Some(RetryCondition::NonZeroExit),
        TerminationCause::TimedOut => Some(RetryCondition::TimedOut),
        TerminationCause::SignalTerminated { .. } => Some(RetryCondition::SignalTerminated),
        TerminationCause::SpawnFailed(_) => Some(RetryCondition::SpawnFailed),
        TerminationCause::Cancelled => None,
    }
}

/// Run `make_request(attempt)` until it produces a non-qualifying report
/// or attempts run out. Errors (validation, reap) end the loop at once.
pub async fn run_with_retry<E, F>(
    executor: &E,
    mut make_request: F,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> ExecResult<RetryOutcome>
where
    E: Execute + ?Sized,
    F: FnMut(u32) -> ExecRequest + Send,
{
    retry.validate()?;

    let mut previous_causes = Vec::new();
    let mut attempt = 1;

    loop {
        let report = executor.execute(make_request(attempt), cancel.clone()).await?;

        let condition = retry_condition(&report);
        let qualifies = condition.map_or(false, |c| retry.retry_on.contains(&c));
        if !qualifies || attempt >= retry.max_attempts || cancel.is_cancelled() {
            debug!(
                invocation_id = %report.invocation_id,
                attempt,
                cause = %report.termination_cause,
                "Retry loop finished"
            );
            return Ok(RetryOutcome {
                report,
                attempts: attempt,
                previous_causes,
            });
        }

        let delay = retry.delay_after(attempt);
        info!(
            invocation_id = %report.invocation_id,
            attempt,
            max_attempts = retry.max_attempts,
            cause = %report.termination_cause,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(RetryOutcome {
                    report,
                    attempts: attempt,
                    previous_causes,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }

        previous_causes.push(report.termination_cause);
        attempt += 1;
    }
}
