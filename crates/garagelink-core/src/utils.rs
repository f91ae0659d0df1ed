/*!
 * Utility functions and helpers for garagelink.
 */
use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// How many times a cloud operation may be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; zero is treated as one
    pub max_attempts: usize,
}

impl RetryPolicy {
    /// One attempt followed by a single immediate retry
    pub const ONE_RETRY: RetryPolicy = RetryPolicy { max_attempts: 2 };

    /// Create a policy allowing `max_attempts` attempts
    pub const fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    fn effective_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ONE_RETRY
    }
}

/// The result of a retried operation together with the attempts it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Value of the last attempt
    pub result: Result<T, E>,
    /// Number of attempts made
    pub attempts: usize,
}

impl<T, E> Attempted<T, E> {
    /// Whether the last attempt succeeded
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run an operation until it succeeds or the policy is exhausted
///
/// Retries happen immediately with no delay. The operation receives the
/// 1-based attempt number.
///
/// # Arguments
///
/// * `policy` - The attempt limit
/// * `what` - A short description used in log lines
/// * `operation` - A function that creates a new future for each attempt
pub async fn with_retry<F, Fut, T, E>(policy: RetryPolicy, what: &str, operation: F) -> Attempted<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(policy, what, |_: &E| true, operation).await
}

/// Like [`with_retry`], but stops early on errors `retryable` rejects
pub async fn with_retry_if<P, F, Fut, T, E>(
    policy: RetryPolicy,
    what: &str,
    retryable: P,
    mut operation: F,
) -> Attempted<T, E>
where
    P: Fn(&E) -> bool,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.effective_attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", what, attempt);
                }
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if attempt < max_attempts && retryable(&e) => {
                warn!("{} failed on attempt {}: {}, retrying", what, attempt, e);
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed after {} attempts: {}", what, attempt, e);
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Spawn a task that logs its error instead of returning it
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_retry_success_first_try() {
        let counter = AtomicUsize::new(0);

        let outcome = with_retry(RetryPolicy::ONE_RETRY, "fetch", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(42) }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_with_retry_success_on_retry() {
        let outcome = with_retry(RetryPolicy::ONE_RETRY, "command", |attempt| async move {
            if attempt == 1 {
                Err(Error::other("Intentional failure"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_with_retry_stops_at_limit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let outcome = with_retry(RetryPolicy::new(2), "command", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::other("Intentional failure")) }
        })
        .await;

        assert!(matches!(outcome.result, Err(Error::Other(_))));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let outcome = with_retry(RetryPolicy::new(0), "fetch", |_| async {
            Err::<(), _>(Error::other("down"))
        })
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_with_retry_if_stops_on_permanent_error() {
        let counter = AtomicUsize::new(0);

        let outcome = with_retry_if(
            RetryPolicy::new(3),
            "login",
            |e: &Error| !e.is_fatal(),
            |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::config("bad credentials")) }
            },
        )
        .await;

        assert!(matches!(outcome.result, Err(Error::Config(_))));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy_allows_one_retry() {
        assert_eq!(RetryPolicy::default().max_attempts, 2);
    }

    #[tokio::test]
    async fn test_spawn_and_log() {
        let ok = spawn_and_log("ok", async { Ok::<_, Error>(()) });
        let failed = spawn_and_log("failed", async { Err::<(), _>(Error::other("boom")) });
        tokio_test::assert_ok!(ok.await);
        tokio_test::assert_ok!(failed.await);
    }
}
