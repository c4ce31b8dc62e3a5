//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Display;
use std::time::Duration;

use tracing::warn;

/// Bounded exponential backoff for transient registry failures.
///
/// The policy is consumed by the metadata-provider adapter, not by the
/// resolver; resolution itself stays retry-agnostic. Which errors count as
/// transient is the caller's decision, passed in as a classifier, and the
/// sleep function is a parameter so tests never actually wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-running after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Run `op`, retrying transient failures until the attempt budget is
    /// spent. Permanent failures are returned immediately.
    pub fn run<T, E, S, C, F>(
        &self,
        mut sleep: S,
        retryable: C,
        mut op: F,
    ) -> std::result::Result<T, E>
    where
        E: Display,
        S: FnMut(Duration),
        C: Fn(&E) -> bool,
        F: FnMut() -> std::result::Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts && retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient registry error, backing off: {}",
                        err
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum StubError {
        Transient,
        Permanent,
    }

    impl Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn is_transient(err: &StubError) -> bool {
        matches!(err, StubError::Transient)
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        let mut slept = Vec::new();
        let mut calls = 0;
        let result: Result<u32, StubError> = policy.run(
            |d| slept.push(d),
            is_transient,
            || {
                calls += 1;
                if calls < 3 {
                    Err(StubError::Transient)
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
        // Exponential: 10ms then 20ms.
        assert_eq!(
            slept,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<u32, StubError> = policy.run(
            |_| panic!("must not sleep for a permanent error"),
            is_transient,
            || {
                calls += 1;
                Err(StubError::Permanent)
            },
        );
        assert_eq!(result, Err(StubError::Permanent));
        assert_eq!(calls, 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<u32, StubError> = policy.run(
            |_| {},
            is_transient,
            || {
                calls += 1;
                Err(StubError::Transient)
            },
        );
        assert_eq!(result, Err(StubError::Transient));
        assert_eq!(calls, 4);
    }
}
