//! Fixed-wait retry for idempotent transport calls.
//!
//! `retry(label, &policy, op)` is the explicit form of "retry N times,
//! S seconds apart": `op` runs until it succeeds, fails with an error that
//! is not worth repeating, or uses up its attempts. Whatever error ends the
//! loop is returned as is.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::transport::TransportError;

/// Whether a failed call may succeed if simply repeated.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Tries in total, the first included. Zero behaves like one.
    pub attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    /// Three tries, five seconds apart.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, wait: Duration) -> Self {
        Self { attempts, wait }
    }

    /// One try, no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

pub async fn retry<F, Fut, T, E>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let attempts = policy.attempts.max(1);
    let mut tried = 0;
    loop {
        tried += 1;
        let err = match op().await {
            Ok(value) => {
                if tried > 1 {
                    debug!(label, tried, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if tried >= attempts || !err.is_retryable() {
            if tried > 1 {
                warn!(label, tried, error = %err, "Giving up");
            }
            return Err(err);
        }

        warn!(
            label,
            tried,
            attempts,
            wait_ms = policy.wait.as_millis() as u64,
            error = %err,
            "Call failed, will retry"
        );
        sleep(policy.wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Flaky(&'static str),
        Broken,
    }

    impl Display for Outcome {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for Outcome {
        fn is_retryable(&self) -> bool {
            matches!(self, Outcome::Flaky(_))
        }
    }

    /// Replays scripted results one per call and counts the calls.
    struct Script {
        steps: RefCell<VecDeque<Result<u32, Outcome>>>,
        calls: RefCell<u32>,
    }

    impl Script {
        fn new(steps: Vec<Result<u32, Outcome>>) -> Self {
            Self {
                steps: RefCell::new(steps.into()),
                calls: RefCell::new(0),
            }
        }

        async fn next(&self) -> Result<u32, Outcome> {
            *self.calls.borrow_mut() += 1;
            self.steps.borrow_mut().pop_front().unwrap_or(Ok(0))
        }

        fn calls(&self) -> u32 {
            *self.calls.borrow()
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_flaky_call_recovers() {
        let script = Script::new(vec![Err(Outcome::Flaky("a")), Err(Outcome::Flaky("b")), Ok(7)]);
        assert_eq!(retry("search", &quick(3), || script.next()).await, Ok(7));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn test_last_error_survives_exhaustion() {
        let script = Script::new(vec![Err(Outcome::Flaky("first")), Err(Outcome::Flaky("second"))]);
        assert_eq!(
            retry("read", &quick(2), || script.next()).await,
            Err(Outcome::Flaky("second"))
        );
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_repeated() {
        let script = Script::new(vec![Err(Outcome::Broken), Ok(1)]);
        assert_eq!(retry("read", &quick(5), || script.next()).await, Err(Outcome::Broken));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let script = Script::new(vec![Err(Outcome::Flaky("only"))]);
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert!(retry("read", &policy, || script.next()).await.is_err());
        assert_eq!(script.calls(), 1);
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
