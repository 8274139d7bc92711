//! Fixed-delay retry with an injectable sleeper.
//!
//! The service retries store connections forever; tests use bounded policies
//! and a recording sleeper so nothing actually waits.

use anyhow::Result;
use log::warn;
use std::time::Duration;

/// Anything that can block the current thread for a while.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real sleeps via `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until success.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn forever(delay: Duration) -> Self {
        Self { delay, max_attempts: None }
    }

    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self { delay, max_attempts: Some(max_attempts.max(1)) }
    }
}

/// Run `op` until it succeeds or the policy runs out of attempts.
///
/// Every failure is logged with `label`. The last error is returned with the
/// attempt count attached.
pub fn retry_with_backoff<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(e.context(format!("{label} failed after {attempt} attempts")));
                }
                warn!(
                    "{label} failed: {e:#}. Retrying in {} seconds...",
                    policy.delay.as_secs()
                );
                sleeper.sleep(policy.delay);
            }
        }
    }
}
