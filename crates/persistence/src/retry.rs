//! Retry policy for management API calls

use std::future::Future;
use std::time::Duration;
use voice_agent_config::ReportingConfig;

use crate::{ErrorKind, ReportError};

/// Retry schedule keyed by `ErrorKind`
///
/// - `Transient`: fixed short interval
/// - `RateLimited` / `Unavailable`: starts at `retry_delay`, doubles up to `max_backoff`
/// - `Fatal`: no retry
///
/// At most `max_retries` retries follow the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub transient_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            retry_delay: Duration::from_secs(10),
            transient_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(config: &ReportingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            transient_delay: Duration::from_millis(config.transient_retry_delay_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (1-based) after an error of `kind`
    pub fn delay_for(&self, kind: ErrorKind, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        match kind {
            ErrorKind::Fatal => None,
            ErrorKind::Transient => Some(self.transient_delay),
            ErrorKind::RateLimited | ErrorKind::Unavailable => {
                let factor = 2u32.saturating_pow(retry - 1);
                Some(self.retry_delay.saturating_mul(factor).min(self.max_backoff))
            }
        }
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ReportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReportError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    retry += 1;
                    let Some(delay) = self.delay_for(e.kind(), retry) else {
                        return Err(e);
                    };
                    tracing::warn!(
                        request = label,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Management API request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn unavailable() -> ReportError {
        ReportError::Status {
            status: 503,
            body: "busy".into(),
        }
    }

    fn would_block() -> ReportError {
        ReportError::Network {
            kind: ErrorKind::Transient,
            message: "write could not complete without blocking".into(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay: Duration::from_secs(10),
            transient_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        };
        let delays: Vec<_> = (1..=6)
            .map(|n| policy.delay_for(ErrorKind::Unavailable, n))
            .collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(10)),
                Some(Duration::from_secs(20)),
                Some(Duration::from_secs(30)),
                Some(Duration::from_secs(30)),
                Some(Duration::from_secs(30)),
                None,
            ]
        );
        assert_eq!(
            policy.delay_for(ErrorKind::Transient, 3),
            Some(Duration::from_millis(500))
        );
        assert_eq!(policy.delay_for(ErrorKind::Fatal, 1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = policy
            .run("report", || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err(would_block()),
                        _ => Ok("ok"),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::default().with_max_retries(2);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("report", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert!(matches!(result, Err(ReportError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("report", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ReportError::DeviceNotFound("aa:bb".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ReportError::DeviceNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
