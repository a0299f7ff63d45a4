//! Bounded retry with linear backoff
//!
//! Used both for reopening the serial link and for remote uploads. The delay
//! grows as `base_delay × attempt` and is applied only between attempts; a
//! final failure returns immediately.

use crate::error::Result;
use std::time::Duration;

/// Default number of attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff step
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Retry policy for a fallible operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay step; attempt `n` is followed by a sleep of `base_delay × n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and delay step
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay applied after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned when every attempt fails.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        attempts,
                        e
                    );
                    std::thread::sleep(self.delay_after(attempt));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("{} failed after {} attempts: {}", what, attempts, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_first_success_runs_once() {
        let mut calls = 0;
        let value = fast_policy()
            .run("op", |_| {
                calls += 1;
                Ok(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_succeeds_on_last_attempt() {
        let mut seen = Vec::new();
        let result = fast_policy().run("op", |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(DaqError::Upload("refused".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_returns_last_error() {
        let mut calls = 0;
        let err = fast_policy()
            .run::<(), _>("op", |attempt| {
                calls += 1;
                Err(DaqError::Upload(format!("attempt {}", attempt)))
            })
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[test]
    fn test_linear_backoff_between_attempts_only() {
        let policy = RetryPolicy::new(3, Duration::from_millis(20));
        assert_eq!(policy.delay_after(1), Duration::from_millis(20));
        assert_eq!(policy.delay_after(2), Duration::from_millis(40));

        let start = Instant::now();
        let _ = policy.run::<(), _>("op", |_| Err(DaqError::Timeout("x".into())));
        let elapsed = start.elapsed();
        // 20 + 40 ms of sleeping; no sleep after the final attempt
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let mut calls = 0;
        let _ = policy.run::<(), _>("op", |_| {
            calls += 1;
            Err(DaqError::Timeout("x".into()))
        });
        assert_eq!(calls, 1);
    }
}
