//! Execution and retry policies.

use crate::config::{duration_serde, option_duration_serde};
use hsu_common::{ExecError, ExecResult};
use hsu_resource_limits::ResourceLimits;
use hsu_stream::DEFAULT_MAX_OUTPUT_BYTES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Limits and behaviour applied to one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Wall-clock limit; `None` means unbounded.
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Cap per captured stream; `None` captures without bound.
    pub max_output_bytes: Option<usize>,

    /// When set, only these inherited variables reach the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_environment_keys: Option<BTreeSet<String>>,

    /// Delay between the graceful signal and the forced kill.
    #[serde(with = "duration_serde")]
    pub termination_grace_period: Duration,

    pub resource_limits: ResourceLimits,

    /// Run the child in its own process group and signal the whole group (Unix).
    pub kill_process_group: bool,

    /// How long pumps may keep draining once the child has been reaped.
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub io_drain_timeout: Option<Duration>,

    /// Sample child resource usage at this interval when set.
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub resource_sample_interval: Option<Duration>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            max_output_bytes: Some(DEFAULT_MAX_OUTPUT_BYTES),
            allowed_environment_keys: None,
            termination_grace_period: DEFAULT_GRACE_PERIOD,
            resource_limits: ResourceLimits::default(),
            kill_process_group: true,
            io_drain_timeout: Some(DEFAULT_IO_DRAIN_TIMEOUT),
            resource_sample_interval: None,
        }
    }
}

impl ExecutionPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.termination_grace_period = grace;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = Some(max);
        self
    }

    pub fn unbounded_output(mut self) -> Self {
        self.max_output_bytes = None;
        self
    }

    pub fn with_allowed_environment_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_environment_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_process_group_kill(mut self, enabled: bool) -> Self {
        self.kill_process_group = enabled;
        self
    }

    pub fn with_io_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_drain_timeout = timeout;
        self
    }

    pub fn with_resource_sampling(mut self, interval: Duration) -> Self {
        self.resource_sample_interval = Some(interval);
        self
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(ExecError::invalid_spec(
                "policy.timeout",
                "timeout must be greater than zero (omit it for no timeout)",
            ));
        }

        if let Some(keys) = &self.allowed_environment_keys {
            if let Some(bad) = keys.iter().find(|k| k.is_empty() || k.contains('=')) {
                return Err(ExecError::invalid_spec(
                    "policy.allowed_environment_keys",
                    format!("invalid environment key: {:?}", bad),
                ));
            }
        }

        if self.resource_sample_interval == Some(Duration::ZERO) {
            return Err(ExecError::invalid_spec(
                "policy.resource_sample_interval",
                "sample interval must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Outcomes that make a run eligible for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCondition {
    SpawnFailed,
    TimedOut,
    NonZeroExit,
    SignalTerminated,
}

/// Caller-layer retry around whole runs.
///
/// Cancellation and validation failures never qualify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retrying.
    pub max_attempts: u32,
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
    pub retry_on: BTreeSet<RetryCondition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retry_on: [
                RetryCondition::SpawnFailed,
                RetryCondition::TimedOut,
                RetryCondition::NonZeroExit,
                RetryCondition::SignalTerminated,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_retry_on<I>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = RetryCondition>,
    {
        self.retry_on = conditions.into_iter().collect();
        self
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts completed
    /// attempts starting at 1. Grows by `backoff_multiplier`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.max_attempts == 0 {
            return Err(ExecError::invalid_spec(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ExecError::invalid_spec(
                "retry.backoff_multiplier",
                "multiplier must be a finite number >= 1.0",
            ));
        }
        Ok(())
    }
}
