//! Retry classification: a pure function of (request path, outcome, attempt).
//!
//! Unlike a circuit breaker, this carries no state of its own — every call is
//! independent, which is what makes it unit-testable without wall-clock time.

use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path fragment that marks the one endpoint network errors are allowed to
/// retry against. Matches `metadata/tml/import` in the REST surface.
pub const RETRYABLE_NETWORK_ERROR_PATH_MARKER: &str = "metadata/tml/import";

/// Tunable backoff/attempt parameters. 60s base, exponent base 4, 3 attempts
/// are the default; kept as a struct rather than constants so tests can
/// exercise other shapes without wall-clock delay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub exponent_base: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            exponent_base: 4.0,
            max_attempts: 3,
        }
    }
}

/// What happened on one HTTP attempt, as far as the classifier cares.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Read timeout, connect error, or remote protocol error — no response came back.
    NetworkError,
    /// A response came back with this status code.
    HttpStatus(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveReason {
    /// This kind of outcome is never retried.
    NotRetryable,
    /// A network error occurred but the request wasn't against the whitelisted path.
    NetworkErrorOffWhitelist,
    /// The attempt budget is exhausted.
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Continue(Duration),
    Give(GiveReason),
}

pub fn is_server_pressure(status: u16) -> bool {
    status == 502 || status == 504
}

/// Decide whether `attempt` (1-indexed, the attempt that just produced `outcome`)
/// should be followed by another attempt.
pub fn classify(policy: &RetryPolicy, path: &str, outcome: Outcome, attempt: u32) -> RetryDecision {
    let retryable = match outcome {
        Outcome::NetworkError => path.contains(RETRYABLE_NETWORK_ERROR_PATH_MARKER),
        Outcome::HttpStatus(status) => is_server_pressure(status),
    };

    if !retryable {
        let reason = match outcome {
            Outcome::NetworkError => GiveReason::NetworkErrorOffWhitelist,
            Outcome::HttpStatus(_) => GiveReason::NotRetryable,
        };
        return RetryDecision::Give(reason);
    }

    if attempt >= policy.max_attempts {
        return RetryDecision::Give(GiveReason::AttemptsExhausted);
    }

    let delay = backoff_delay(policy, attempt);
    log_debug!(
        path = %path,
        attempt,
        delay_secs = delay.as_secs_f64(),
        "retrying request after backoff"
    );
    RetryDecision::Continue(delay)
}

/// `base * exponent_base^(attempt - 1)`, matching `tenacity.wait_exponential(min=60, exp_base=4)`.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let seconds = policy.base_delay.as_secs_f64() * policy.exponent_base.powi((attempt - 1) as i32);
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_retried_only_on_tml_import_path() {
        let policy = RetryPolicy::default();
        let decision = classify(&policy, "api/rest/2.0/metadata/tml/import", Outcome::NetworkError, 1);
        assert!(matches!(decision, RetryDecision::Continue(_)));

        let decision = classify(&policy, "api/rest/2.0/metadata/search", Outcome::NetworkError, 1);
        assert_eq!(
            decision,
            RetryDecision::Give(GiveReason::NetworkErrorOffWhitelist)
        );
    }

    #[test]
    fn server_pressure_always_retried() {
        let policy = RetryPolicy::default();
        for path in ["api/rest/2.0/metadata/search", "api/rest/2.0/metadata/tml/import"] {
            let decision = classify(&policy, path, Outcome::HttpStatus(502), 1);
            assert!(matches!(decision, RetryDecision::Continue(_)));
            let decision = classify(&policy, path, Outcome::HttpStatus(504), 1);
            assert!(matches!(decision, RetryDecision::Continue(_)));
        }
    }

    #[test]
    fn other_statuses_never_retried() {
        let policy = RetryPolicy::default();
        let decision = classify(&policy, "api/rest/2.0/metadata/search", Outcome::HttpStatus(500), 1);
        assert_eq!(decision, RetryDecision::Give(GiveReason::NotRetryable));
    }

    #[test]
    fn backoff_matches_spec_example() {
        let policy = RetryPolicy::default();
        match classify(&policy, "x/tml/import", Outcome::HttpStatus(504), 1) {
            RetryDecision::Continue(d) => assert_eq!(d, Duration::from_secs(60)),
            other => panic!("expected Continue, got {other:?}"),
        }
        match classify(&policy, "x/tml/import", Outcome::HttpStatus(504), 2) {
            RetryDecision::Continue(d) => assert_eq!(d, Duration::from_secs(240)),
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn attempts_exhausted_after_max() {
        let policy = RetryPolicy::default();
        let decision = classify(&policy, "x/tml/import", Outcome::HttpStatus(504), 3);
        assert_eq!(decision, RetryDecision::Give(GiveReason::AttemptsExhausted));
    }
}
