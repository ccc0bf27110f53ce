use std::time::Duration;

use tokio_retry::{RetryIf, strategy::ExponentialBackoff};

/// HTTP statuses that are retried against the same host before falling back.
pub const DEFAULT_STATUS_FORCELIST: [u16; 6] = [418, 429, 500, 502, 503, 504];

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// A retry strategy trait.
pub trait Strategy: Iterator<Item = Duration> + Clone + Send + Sync + 'static {}

/// Implement the Strategy trait for any type that is an iterator of Durations (i.e. all backoffs
/// exported by `tokio_retry`)
impl<T> Strategy for T where T: Iterator<Item = Duration> + Clone + Send + Sync + 'static {}

/// Per-host retry policy.
///
/// `total` is the number of retries after the first attempt. Sleeps grow as
/// `backoff_factor * 2^n`, so a factor of 0.5s yields 0.5s, 1s, 2s, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub total: usize,
    /// Base backoff
    pub backoff_factor: Duration,
    /// Statuses that trigger a retry
    pub status_forcelist: Vec<u16>,
}

impl RetryPolicy {
    /// Create a policy with the default status forcelist.
    pub fn new(total: usize, backoff_factor: Duration) -> Self {
        Self { total, backoff_factor, status_forcelist: DEFAULT_STATUS_FORCELIST.to_vec() }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Whether a response with `status` should be retried.
    pub fn retries_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Backoff schedule for this policy.
    pub fn strategy(&self) -> impl Strategy {
        let half_ms = (self.backoff_factor.as_millis() / 2).max(1) as u64;
        let zero = self.backoff_factor.is_zero();
        ExponentialBackoff::from_millis(2)
            .factor(half_ms)
            .max_delay(MAX_BACKOFF)
            .map(move |delay| if zero { Duration::ZERO } else { delay })
            .take(self.total)
    }
}

/// Retry the provided async operation following `policy`.
///
/// Retries are attempted as long as the provided `condition` returns `true` for
/// the error produced by the operation.
pub async fn retry_with_backoff_if<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    op: F,
    condition: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    RetryIf::spawn(policy.strategy(), op, condition).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn strategy_doubles_from_backoff_factor() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let delays: Vec<_> = policy.strategy().collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(500), Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn zero_backoff_never_sleeps() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        assert!(policy.strategy().all(|delay| delay.is_zero()));
        assert_eq!(RetryPolicy::none().strategy().count(), 0);
    }

    #[test]
    fn forcelist_matches_default_statuses() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        assert!(policy.retries_status(503));
        assert!(policy.retries_status(429));
        assert!(!policy.retries_status(404));
    }

    #[tokio::test]
    async fn stops_retrying_when_condition_rejects() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result: Result<(), &str> = retry_with_backoff_if(
            &policy,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |err: &&str| *err != "fatal",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_total() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<(), &str> = retry_with_backoff_if(
            &policy,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("flaky") }
            },
            |_: &&str| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
