//! Retry policy and the per-call retry state machine
//!
//! The machine has no I/O. The client feeds it attempt outcomes and jitter
//! samples and acts on the state it returns:
//!
//! `Idle -> Attempting(n) -> Succeeded | Retrying { delay } -> Attempting(n + 1) | Failed`

use crate::config::HttpConfig;
use crate::errors::NetworkError;
use std::time::Duration;

/// Exponential backoff with a cap and bounded jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra delay as a fraction of the exponential delay, clamped to 0.0 - 1.0
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Delay after failed attempt `attempt` (0-based); `jitter` is a sample in `[0, 1)`.
    ///
    /// `min(max_delay, base * 2^attempt * (1 + jitter * ratio))`. With the ratio
    /// clamped to 1 the uncapped value for attempt n never exceeds the bare
    /// exponential for n + 1, so delays are non-decreasing in `attempt`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        if exponential >= self.max_delay {
            return self.max_delay;
        }

        let factor = jitter.clamp(0.0, 1.0) * self.jitter_ratio.clamp(0.0, 1.0);
        let extra = exponential.mul_f64(factor);
        (exponential + extra).min(self.max_delay)
    }
}

/// Classified result of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    /// Timeout, 5xx, 429, connection reset
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Non-retriable rejection
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Idle,
    Attempting(u32),
    Retrying { attempt: u32, delay: Duration },
    Succeeded,
    Failed(NetworkError),
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::Failed(_))
    }
}

/// Retry state for a single logical call
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Move to `Attempting` and return the attempt number, or None once terminal
    pub fn begin_attempt(&mut self) -> Option<u32> {
        let attempt = match self.state {
            RetryState::Idle => 0,
            RetryState::Attempting(n) => n,
            RetryState::Retrying { attempt, .. } => attempt + 1,
            RetryState::Succeeded | RetryState::Failed(_) => return None,
        };
        self.state = RetryState::Attempting(attempt);
        Some(attempt)
    }

    /// Feed the outcome of the current attempt. Ignored unless attempting.
    pub fn record(&mut self, outcome: AttemptOutcome, jitter: f64) -> &RetryState {
        let RetryState::Attempting(attempt) = self.state else {
            return &self.state;
        };

        self.state = match outcome {
            AttemptOutcome::Success => RetryState::Succeeded,
            AttemptOutcome::Rejected { status, body } => {
                RetryState::Failed(NetworkError::Rejected { status, body })
            }
            AttemptOutcome::Transient {
                message,
                retry_after,
            } => {
                let attempts_made = attempt + 1;
                if attempts_made >= self.policy.max_attempts {
                    RetryState::Failed(NetworkError::Exhausted {
                        attempts: attempts_made,
                        last_error: message,
                    })
                } else {
                    let backoff = self.policy.delay_for(attempt, jitter);
                    let delay = retry_after.map_or(backoff, |hint| backoff.max(hint));
                    RetryState::Retrying { attempt, delay }
                }
            }
        };
        &self.state
    }
}
