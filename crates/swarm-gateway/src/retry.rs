//! Retry with exponential backoff and error classification.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Retry behaviour for model calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    /// Initial delay when the provider signalled rate limiting.
    pub rate_limit_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryConfig {
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Transient/permanent classification of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport hiccup: timeout, connection reset, 5xx.
    Transport,
    /// Provider throttling: 429 or explicit rate-limit message.
    RateLimited,
    /// Auth, invalid request, 4xx other than 429.
    Permanent,
    Unknown,
}

pub fn classify(error: &anyhow::Error) -> ErrorClass {
    let text = error.to_string().to_lowercase();

    if text.contains("rate limit") || text.contains("too many requests") || text.contains("429") {
        return ErrorClass::RateLimited;
    }
    if text.contains("timeout")
        || text.contains("timed out")
        || text.contains("connection")
        || text.contains("500")
        || text.contains("502")
        || text.contains("503")
        || text.contains("504")
    {
        return ErrorClass::Transport;
    }
    if text.contains("unauthorized")
        || text.contains("forbidden")
        || text.contains("401")
        || text.contains("403")
        || text.contains("404")
        || text.contains("invalid")
        || text.contains("bad request")
        || text.contains("400")
    {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}

/// Backoff executor for model calls.
#[derive(Debug, Clone, Default)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn should_retry(&self, error: &anyhow::Error, attempt: usize) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }
        match classify(error) {
            ErrorClass::Transport | ErrorClass::RateLimited => true,
            ErrorClass::Unknown => attempt < 1,
            ErrorClass::Permanent => false,
        }
    }

    /// Delay before retry number `attempt`, scaled from the class-specific
    /// initial delay.
    pub fn next_delay(&self, class: ErrorClass, attempt: usize) -> Duration {
        let initial = match class {
            ErrorClass::RateLimited => self.config.rate_limit_delay,
            _ => self.config.initial_delay,
        };
        let base =
            initial.as_millis() as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);

        let millis = if self.config.jitter_enabled {
            let mut rng = rand::rng();
            capped * rng.random_range(0.9..=1.1)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }

    /// Run `operation`, retrying transient failures.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.next_delay(classify(&error), attempt);
                    tracing::debug!(
                        target: "swarm::gateway",
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classification() {
        assert_eq!(
            classify(&anyhow::anyhow!("request timed out")),
            ErrorClass::Transport
        );
        assert_eq!(
            classify(&anyhow::anyhow!("429 Too Many Requests")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify(&anyhow::anyhow!("401 unauthorized")),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(&anyhow::anyhow!("something odd")),
            ErrorClass::Unknown
        );
    }

    #[test]
    fn test_rate_limit_backs_off_longer() {
        let strategy = RetryStrategy::new(RetryConfig::default().without_jitter());
        let transport = strategy.next_delay(ErrorClass::Transport, 0);
        let limited = strategy.next_delay(ErrorClass::RateLimited, 0);
        assert!(limited > transport);
        assert_eq!(limited, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let strategy = RetryStrategy::new(RetryConfig::default().without_jitter());
        assert_eq!(
            strategy.next_delay(ErrorClass::Transport, 0),
            Duration::from_millis(500)
        );
        assert_eq!(
            strategy.next_delay(ErrorClass::Transport, 1),
            Duration::from_millis(1000)
        );
        assert!(strategy.next_delay(ErrorClass::Transport, 20) <= Duration::from_secs(60));
    }

    #[test]
    fn test_permanent_not_retried() {
        let strategy = RetryStrategy::default();
        assert!(!strategy.should_retry(&anyhow::anyhow!("invalid request"), 0));
        assert!(strategy.should_retry(&anyhow::anyhow!("timeout"), 2));
        assert!(!strategy.should_retry(&anyhow::anyhow!("timeout"), 3));
    }

    #[tokio::test]
    async fn test_execute_retries_then_succeeds() {
        let strategy = RetryStrategy::new(RetryConfig {
            initial_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let result = strategy
            .execute(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
