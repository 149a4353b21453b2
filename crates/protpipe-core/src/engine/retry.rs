//! Bounded polling for externally caused filesystem convergence.
//!
//! The external tools this pipeline drives are known to lag behind their own
//! record writing, so some steps must wait for files to appear. Waits are
//! always bounded by an explicit policy; exhaustion surfaces as a typed error
//! instead of an endless loop.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("timed out waiting for {what} after {attempts} attempts at {interval:?} intervals")]
pub struct RetryTimeout {
    pub what: String,
    pub attempts: u32,
    pub interval: Duration,
}

/// Maximum attempts and poll interval for one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Polls `predicate` until it returns true, sleeping `interval` between
    /// attempts. Returns the number of attempts used, or [`RetryTimeout`]
    /// once `max_attempts` checks have failed.
    pub fn wait_for<F>(&self, what: &str, mut predicate: F) -> Result<u32, RetryTimeout>
    where
        F: FnMut() -> bool,
    {
        for attempt in 1..=self.max_attempts.max(1) {
            if predicate() {
                return Ok(attempt);
            }
            if attempt < self.max_attempts {
                std::thread::sleep(self.interval);
            }
        }
        Err(RetryTimeout {
            what: what.to_string(),
            attempts: self.max_attempts.max(1),
            interval: self.interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_returns_immediately_when_predicate_holds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        assert_eq!(policy.wait_for("nothing", || true).unwrap(), 1);
    }

    #[test]
    fn wait_for_counts_attempts_until_success() {
        let policy = RetryPolicy::new(10, Duration::from_millis(1));
        let mut calls = 0;
        let attempts = policy
            .wait_for("third time", || {
                calls += 1;
                calls >= 3
            })
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[test]
    fn wait_for_times_out_with_context() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let err = policy.wait_for("artifacts to appear", || false).unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.to_string().contains("artifacts to appear"));
    }

    #[test]
    fn zero_attempts_still_checks_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.wait_for("once", || true).unwrap(), 1);
        assert!(policy.wait_for("never", || false).is_err());
    }
}
