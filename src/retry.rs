//! Bounded retry with exponential backoff, used for compensating releases.

use std::time::Duration;

/// How many times to attempt an operation and how long to wait in between.
///
/// Delay before retry `n` (0-based) is `initial_delay * multiplier^n`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let delay = Duration::from_millis(ms as u64);
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
/// `retryable` decides whether an error is worth another attempt.
/// Returns the last error together with the number of attempts made.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts || !retryable(&e) => return Err((e, attempt)),
            Err(_) => {
                let delay = policy.delay_for_retry(attempt - 1);
                tracing::debug!("attempt {attempt}/{attempts} failed, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
