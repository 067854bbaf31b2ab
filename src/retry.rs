//! Backoff strategies, retry policy and the retry loop.
//!
//! One logical call may take several physical attempts. Each attempt reports an
//! [`Attempt`]: a terminal value, a retryable failure, or a permanent failure. The
//! [`RetryExecutor`] turns that sequence into exactly one outcome.

use crate::Error;
use http::{Method, StatusCode};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Defines how long to wait between attempts and when to give up.
///
/// # Examples
///
/// ```
/// use hoist::RetryStrategy;
/// use std::time::Duration;
///
/// // Exponential backoff: 100ms, 200ms, 400ms, 800ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: 5,
///     jitter: true,
/// };
///
/// // Fixed delay: 1s, 1s, 1s
/// let linear = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
/// ```
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Never retry.
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Each retry waits for `initial_delay * 2^(attempt - 1)` (capped at `max_delay`).
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// The maximum number of retries.
        max_retries: usize,
        /// Whether to scale each delay by a random factor in `[0.5, 1.0]`.
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Linear {
        /// The delay between attempts.
        delay: Duration,
        /// The maximum number of retries.
        max_retries: usize,
    },

    /// Custom retry logic.
    ///
    /// Takes the attempt number that just failed (1-indexed) and returns the delay
    /// before the next one, or `None` to stop.
    Custom {
        /// Function that determines retry delay.
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 8,
            jitter: true,
        }
    }
}

impl RetryStrategy {
    /// Returns the delay before the retry following `attempt`, or `None` if retries are
    /// exhausted.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }

                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1) as u32);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, max_retries } => {
                if attempt > *max_retries {
                    None
                } else {
                    Some(*delay)
                }
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Decides which completed responses are worth another attempt.
///
/// Only responses reach the predicate; transport failures are always permanent.
///
/// # Examples
///
/// ```
/// use hoist::RetryPredicate;
/// use http::{Method, StatusCode};
///
/// struct RetryUnavailableGet;
///
/// impl RetryPredicate for RetryUnavailableGet {
///     fn should_retry(&self, method: &Method, status: StatusCode) -> bool {
///         method == Method::GET && status == StatusCode::SERVICE_UNAVAILABLE
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if a response with `status` to a `method` request should be retried.
    fn should_retry(&self, method: &Method, status: StatusCode) -> bool;
}

/// Retries `429 Too Many Requests` on `GET` only. This is the default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryRateLimitedGet;

impl RetryPredicate for RetryRateLimitedGet {
    fn should_retry(&self, method: &Method, status: StatusCode) -> bool {
        method == Method::GET && status == StatusCode::TOO_MANY_REQUESTS
    }
}

/// Retries `429 Too Many Requests` on every idempotent verb.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryRateLimitedIdempotent;

impl RetryPredicate for RetryRateLimitedIdempotent {
    fn should_retry(&self, method: &Method, status: StatusCode) -> bool {
        let idempotent = matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        );
        idempotent && status == StatusCode::TOO_MANY_REQUESTS
    }
}

/// Retries if ANY of the wrapped predicates does.
///
/// ```
/// use hoist::retry::{OrPredicate, RetryRateLimitedGet};
/// use hoist::RetryPredicate;
/// use http::{Method, StatusCode};
///
/// struct RetryBadGateway;
///
/// impl RetryPredicate for RetryBadGateway {
///     fn should_retry(&self, _method: &Method, status: StatusCode) -> bool {
///         status == StatusCode::BAD_GATEWAY
///     }
/// }
///
/// let predicate = OrPredicate::new(vec![
///     Box::new(RetryRateLimitedGet),
///     Box::new(RetryBadGateway),
/// ]);
/// assert!(predicate.should_retry(&Method::POST, StatusCode::BAD_GATEWAY));
/// ```
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    /// Creates a new `OrPredicate` from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, method: &Method, status: StatusCode) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(method, status))
    }
}

/// The outcome of one physical attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Stop and hand `T` to the caller.
    Terminal(T),
    /// Try again after a backoff delay.
    Retry {
        /// Why the attempt failed; surfaced if the budget runs out.
        error: Error,
        /// A server-suggested minimum wait.
        hint: Option<Duration>,
    },
    /// Stop and surface the error.
    Permanent(Error),
}

/// Drives attempts until one is terminal, permanent, or the budget is spent.
///
/// The budget is bounded twice: by the strategy's retry count and by `max_elapsed`,
/// the total time a call may spend including sleeps.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    strategy: RetryStrategy,
    max_elapsed: Duration,
}

impl RetryExecutor {
    /// Creates an executor.
    pub fn new(strategy: RetryStrategy, max_elapsed: Duration) -> Self {
        Self {
            strategy,
            max_elapsed,
        }
    }

    /// Runs `attempt` (called with the 1-indexed attempt number) until it settles.
    ///
    /// Returns the terminal value together with the number of attempts made. Cancelling
    /// `cancel` interrupts an in-flight attempt or backoff sleep with [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<(T, usize), Error>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = attempt(attempts) => outcome,
            };

            let (error, hint) = match outcome {
                Attempt::Terminal(value) => return Ok((value, attempts)),
                Attempt::Permanent(error) => return Err(error),
                Attempt::Retry { error, hint } => (error, hint),
            };

            let delay = match self.strategy.delay_for_attempt(attempts) {
                Some(delay) => hint.map_or(delay, |hint| delay.max(hint)),
                None => return Err(exhausted(attempts, error)),
            };

            let over_budget = start
                .elapsed()
                .checked_add(delay)
                .map_or(true, |resume_at| resume_at > self.max_elapsed);
            if over_budget {
                tracing::warn!(
                    attempt = attempts,
                    max_elapsed_secs = self.max_elapsed.as_secs(),
                    "Retry budget exhausted"
                );
                return Err(exhausted(attempts, error));
            }

            tracing::warn!(
                error = %error,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "Retrying request after delay"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn exhausted(attempts: usize, last_error: Error) -> Error {
    Error::MaxRetriesExceeded {
        attempts,
        last_error: Box::new(last_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryExecutor {
        RetryExecutor::new(
            RetryStrategy::Linear {
                delay: Duration::from_millis(1),
                max_retries: 3,
            },
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
            jitter: false,
        };

        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(strategy.delay_for_attempt(4), Some(Duration::from_millis(800)));
        assert_eq!(strategy.delay_for_attempt(5), Some(Duration::from_millis(1600)));
        assert_eq!(strategy.delay_for_attempt(6), None);
    }

    #[test]
    fn test_exponential_backoff_caps_and_jitters() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            max_retries: 10,
            jitter: true,
        };

        for attempt in 1..=10 {
            let delay = strategy.delay_for_attempt(attempt).unwrap();
            assert!(delay <= Duration::from_secs(4), "attempt {attempt}: {delay:?}");
        }
        let late = strategy.delay_for_attempt(8).unwrap();
        assert!(late >= Duration::from_secs(2));
    }

    #[test]
    fn test_linear_and_none() {
        let strategy = RetryStrategy::Linear {
            delay: Duration::from_secs(1),
            max_retries: 2,
        };
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(3), None);
        assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
    }

    #[test]
    fn test_rate_limit_predicates() {
        let get_only = RetryRateLimitedGet;
        assert!(get_only.should_retry(&Method::GET, StatusCode::TOO_MANY_REQUESTS));
        assert!(!get_only.should_retry(&Method::POST, StatusCode::TOO_MANY_REQUESTS));
        assert!(!get_only.should_retry(&Method::DELETE, StatusCode::TOO_MANY_REQUESTS));
        assert!(!get_only.should_retry(&Method::GET, StatusCode::SERVICE_UNAVAILABLE));

        let idempotent = RetryRateLimitedIdempotent;
        assert!(idempotent.should_retry(&Method::DELETE, StatusCode::TOO_MANY_REQUESTS));
        assert!(!idempotent.should_retry(&Method::POST, StatusCode::TOO_MANY_REQUESTS));
        assert!(!idempotent.should_retry(&Method::PATCH, StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_attempted_once() {
        let calls = AtomicUsize::new(0);
        let result = fast()
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::<()>::Permanent(Error::Timeout) }
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_terminal() {
        let (value, attempts) = fast()
            .run(&CancellationToken::new(), |attempt| async move {
                if attempt < 3 {
                    Attempt::Retry {
                        error: Error::ConfigurationError("busy".into()),
                        hint: None,
                    }
                } else {
                    Attempt::Terminal(attempt * 10)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_keeps_last_error() {
        let result = fast()
            .run(&CancellationToken::new(), |attempt| async move {
                Attempt::<()>::Retry {
                    error: Error::ConfigurationError(format!("attempt {attempt}")),
                    hint: None,
                }
            })
            .await;

        match result {
            Err(Error::MaxRetriesExceeded {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error.to_string(), "Configuration error: attempt 4");
            }
            other => panic!("Expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_elapsed_bounds_the_loop() {
        let executor = RetryExecutor::new(
            RetryStrategy::Linear {
                delay: Duration::from_secs(5),
                max_retries: 100,
            },
            Duration::from_secs(1),
        );
        let start = Instant::now();
        let result = executor
            .run(&CancellationToken::new(), |_| async {
                Attempt::<()>::Retry {
                    error: Error::Timeout,
                    hint: None,
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(Error::MaxRetriesExceeded { attempts: 1, .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_huge_delay_exhausts_budget() {
        let strategy = RetryStrategy::Custom {
            delay_fn: |_| Some(Duration::MAX),
        };
        let hinted = RetryExecutor::new(fast().strategy, Duration::from_secs(u64::MAX));

        for executor in [RetryExecutor::new(strategy, Duration::from_secs(1)), hinted] {
            let result = executor
                .run(&CancellationToken::new(), |_| async {
                    Attempt::<()>::Retry {
                        error: Error::Timeout,
                        hint: Some(Duration::MAX),
                    }
                })
                .await;

            assert!(matches!(
                result,
                Err(Error::MaxRetriesExceeded { attempts: 1, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff_sleep() {
        let executor = RetryExecutor::new(
            RetryStrategy::Linear {
                delay: Duration::from_secs(30),
                max_retries: 3,
            },
            Duration::from_secs(120),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = executor
            .run(&cancel, |_| async {
                Attempt::<()>::Retry {
                    error: Error::Timeout,
                    hint: None,
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_hint_stretches_delay() {
        let start = Instant::now();
        let (_, attempts) = fast()
            .run(&CancellationToken::new(), |attempt| async move {
                if attempt == 1 {
                    Attempt::Retry {
                        error: Error::Timeout,
                        hint: Some(Duration::from_millis(150)),
                    }
                } else {
                    Attempt::Terminal(())
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts, 2);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
