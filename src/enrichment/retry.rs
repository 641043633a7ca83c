//! Per-provider retry state machine
//!
//! `Attempting(n) -> Backoff(delay) -> Attempting(n + 1) -> ... -> Exhausted`

use std::time::Duration;

use super::providers::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry, doubled for every further one
    pub base_delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Upper bound on a single call, further capped by the overall deadline
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(400),
            max_retries: 2,
            call_timeout: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt number, zero-based
    Attempting(u32),
    Backoff { attempt: u32, delay: Duration },
    Exhausted,
}

impl RetryState {
    pub fn start() -> Self {
        RetryState::Attempting(0)
    }

    /// Transition after an attempt failed with `error`
    pub fn on_failure(self, error: &ProviderError, policy: &RetryPolicy) -> Self {
        match self {
            RetryState::Attempting(n) if error.is_retryable() && n < policy.max_retries => {
                RetryState::Backoff {
                    attempt: n,
                    delay: policy.delay_for(n),
                }
            }
            _ => RetryState::Exhausted,
        }
    }

    /// Transition once the backoff delay has elapsed
    pub fn after_backoff(self) -> Self {
        match self {
            RetryState::Backoff { attempt, .. } => RetryState::Attempting(attempt + 1),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_retry_sequence() {
        let policy = RetryPolicy::default();
        let err = ProviderError::Status(502);

        let mut state = RetryState::start();
        let mut delays = Vec::new();
        loop {
            state = state.on_failure(&err, &policy);
            match state {
                RetryState::Backoff { delay, .. } => {
                    delays.push(delay);
                    state = state.after_backoff();
                }
                RetryState::Exhausted => break,
                RetryState::Attempting(_) => unreachable!(),
            }
        }

        assert_eq!(
            delays,
            vec![Duration::from_millis(400), Duration::from_millis(800)]
        );
    }

    #[test]
    fn test_non_retryable_error_exhausts_immediately() {
        let policy = RetryPolicy::default();
        let state = RetryState::start().on_failure(&ProviderError::Status(404), &policy);
        assert_eq!(state, RetryState::Exhausted);

        let state = RetryState::start()
            .on_failure(&ProviderError::Rejected("private range".into()), &policy);
        assert_eq!(state, RetryState::Exhausted);
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let state = RetryState::start().on_failure(&ProviderError::Timeout, &policy);
        assert_eq!(state, RetryState::Exhausted);
    }

    #[test]
    fn test_backoff_advances_attempt() {
        let state = RetryState::Backoff {
            attempt: 1,
            delay: Duration::from_millis(800),
        };
        assert_eq!(state.after_backoff(), RetryState::Attempting(2));
        assert_eq!(RetryState::Exhausted.after_backoff(), RetryState::Exhausted);
    }
}
