//! Bounded retry with exponential backoff for transient backend errors.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Whether an error message looks like a transient overload.
pub fn is_retryable(message: &str) -> bool {
    let msg = message.to_lowercase();
    ["503", "429", "overloaded", "unavailable"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// How a final failure should be worded to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyKind {
    Overloaded,
    RateLimited,
    Other,
}

impl BusyKind {
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("429") {
            Self::RateLimited
        } else if msg.contains("503") || msg.contains("overloaded") || msg.contains("unavailable") {
            Self::Overloaded
        } else {
            Self::Other
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Overloaded => "The AI service is overloaded right now. Please try again in a few moments.",
            Self::RateLimited => "Too many requests in a short time. Please wait a minute before retrying.",
            Self::Other => "Something went wrong while talking to the AI service.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Text summaries: up to 5 calls in total.
    pub fn summary() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
            factor: 2.5,
            max_jitter: Duration::from_secs(1),
        }
    }

    pub fn speech() -> Self {
        Self {
            max_retries: 3,
            ..Self::summary()
        }
    }

    /// Same policy without randomness, for tests and reproducible runs
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Delay before retry number `retry` (0-based): `base * factor^(retry+1)`
    /// plus a uniform jitter below `max_jitter`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.factor.powi(retry as i32 + 1);
        let jitter = if self.max_jitter.is_zero() {
            0.0
        } else {
            rand::random::<f64>() * self.max_jitter.as_secs_f64()
        };
        Duration::from_secs_f64(exp + jitter)
    }
}

/// Where the backoff actually waits
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the retry
/// budget is spent. The last error is returned as is.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < policy.max_retries && is_retryable(&e.to_string()) => {
                let delay = policy.delay(retries);
                warn!(
                    "Backend busy ({}), retry {}/{} in {:.1}s",
                    e,
                    retries + 1,
                    policy.max_retries,
                    delay.as_secs_f64()
                );
                sleeper.sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable("API error 503: The model is overloaded."));
        assert!(is_retryable("429 Too Many Requests"));
        assert!(is_retryable("Service UNAVAILABLE"));
        assert!(!is_retryable("API error 400: bad request"));
    }

    #[test]
    fn test_busy_kind() {
        assert_eq!(BusyKind::classify("HTTP 429"), BusyKind::RateLimited);
        assert_eq!(BusyKind::classify("model overloaded"), BusyKind::Overloaded);
        assert_eq!(BusyKind::classify("bad key"), BusyKind::Other);
        assert_ne!(
            BusyKind::Overloaded.user_message(),
            BusyKind::RateLimited.user_message()
        );
    }

    #[test]
    fn test_delay_growth_and_jitter_bounds() {
        let policy = RetryPolicy::summary();
        for retry in 0..4 {
            let floor = 2.5f64.powi(retry as i32 + 1);
            let delay = policy.delay(retry).as_secs_f64();
            assert!(delay >= floor && delay < floor + 1.0, "retry {}: {}", retry, delay);
        }
        assert_eq!(
            RetryPolicy::summary().without_jitter().delay(1),
            Duration::from_secs_f64(6.25)
        );
    }

    #[tokio::test]
    async fn test_overloaded_twice_then_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let sleeper = RecordingSleeper::default();

        let result: Result<&str, String> =
            retry_with_backoff(&RetryPolicy::summary(), &sleeper, move || async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("503 overloaded".to_string()),
                    _ => Ok("done"),
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let delays = sleeper.delays.lock().unwrap();
        assert_eq!(delays.len(), 2);
        assert!(delays[1] >= delays[0]);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let sleeper = RecordingSleeper::default();

        let result: Result<(), String> =
            retry_with_backoff(&RetryPolicy::summary(), &sleeper, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("429".to_string())
            })
            .await;

        assert_eq!(result, Err("429".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let sleeper = RecordingSleeper::default();

        let result: Result<(), String> =
            retry_with_backoff(&RetryPolicy::speech(), &sleeper, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("invalid argument".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }
}
