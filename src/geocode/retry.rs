//! Retry and pacing policy shared by every outbound request.

use anyhow::{bail, Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_base`
    pub backoff_base: Duration,
    /// Minimum gap between two requests to the same service
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(2500),
            min_delay: Duration::from_millis(1100),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// Rate-limit, timeout and server-busy responses are worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Enforces a minimum delay between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    min_delay: Duration,
    last_call: Option<Instant>,
}

impl Pacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: None,
        }
    }

    /// Sleep until `min_delay` has passed since the previous call
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            tokio::time::sleep_until(last + self.min_delay).await;
        }
        self.last_call = Some(Instant::now());
    }
}

/// Send a request, retrying transient failures with linear backoff.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed by `send`.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    pacer: &mut Pacer,
    label: &str,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        pacer.wait().await;

        match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if is_retryable_status(response.status()) && attempt < max_attempts => {
                warn!(
                    "{} returned {} (attempt {}/{}), backing off",
                    label,
                    response.status(),
                    attempt,
                    max_attempts
                );
            }
            Ok(response) => {
                bail!(
                    "{} failed with status {} after {} attempt(s)",
                    label,
                    response.status(),
                    attempt
                );
            }
            Err(e) if e.is_timeout() && attempt < max_attempts => {
                warn!(
                    "{} timed out (attempt {}/{}), backing off",
                    label, attempt, max_attempts
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("{} request failed", label));
            }
        }

        tokio::time::sleep(policy.backoff(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2500));
        assert_eq!(policy.backoff(3), Duration::from_millis(7500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_calls() {
        let mut pacer = Pacer::new(Duration::from_millis(1100));
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1100));
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(2200));
    }
}
