//! ErrorClassifier and RetryPolicy (spec §4.5, invariant E8).
//!
//! Grounded on the teacher's `graph::RetryPolicy::exponential` (base/max
//! delay, multiplier) shape, retargeted from node retries to LLM-call retries
//! with an explicit abort-signal check between attempts.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorClassification {
    pub retryable: bool,
    pub fatal: bool,
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classifies an [`AgentError`] as retryable vs fatal (spec §4.5).
    pub fn classify(err: &AgentError) -> ErrorClassification {
        match err {
            AgentError::Llm { message, status } => {
                let retryable_status = matches!(status, Some(429 | 500 | 502 | 503 | 504));
                let retryable_message = {
                    let m = message.to_lowercase();
                    m.contains("network")
                        || m.contains("timeout")
                        || m.contains("rate limit")
                        || m.contains("service unavailable")
                        || m.contains("bad gateway")
                };
                let retryable = retryable_status || retryable_message;
                ErrorClassification {
                    retryable,
                    fatal: !retryable,
                }
            }
            AgentError::Validation(_)
            | AgentError::Sandbox(_)
            | AgentError::NotFound(_)
            | AgentError::Other(_) => ErrorClassification {
                retryable: false,
                fatal: true,
            },
            AgentError::Tool { .. } => ErrorClassification {
                retryable: false,
                fatal: false,
            },
            AgentError::EventStore(_) | AgentError::CheckpointStore(_) => ErrorClassification {
                retryable: false,
                fatal: true,
            },
            AgentError::Cancelled => ErrorClassification {
                retryable: false,
                fatal: true,
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            multiplier,
        }
    }

    pub fn none() -> Self {
        Self::exponential(0, Duration::ZERO, Duration::ZERO, 1.0)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// `RetryPolicy.execute` (spec §4.5): runs `op` up to `max_retries + 1`
    /// times, backing off between retryable failures. A cancelled
    /// `abort_signal` short-circuits immediately with the last error.
    pub async fn execute<T, F, Fut>(
        &self,
        mut abort_signal: watch::Receiver<bool>,
        mut op: F,
    ) -> Result<RetryOutcome<T>, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if *abort_signal.borrow() {
                return Err(AgentError::Cancelled);
            }
            match op().await {
                Ok(result) => return Ok(RetryOutcome { result, attempts: attempt }),
                Err(err) => {
                    let classification = ErrorClassifier::classify(&err);
                    if !classification.retryable || attempt > self.max_retries {
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = abort_signal.changed() => {
                            if *abort_signal.borrow() {
                                return Err(AgentError::Cancelled);
                            }
                        }
                    }
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

    #[test]
    fn retryable_status_codes() {
        for status in [429, 500, 502, 503, 504] {
            let err = AgentError::Llm { message: "x".to_string(), status: Some(status) };
            assert!(ErrorClassifier::classify(&err).retryable);
        }
    }

    #[test]
    fn validation_errors_are_fatal() {
        let err = AgentError::Validation("bad".to_string());
        let c = ErrorClassifier::classify(&err);
        assert!(c.fatal && !c.retryable);
    }

    #[test]
    fn tool_errors_are_neither_retried_nor_fatal_to_the_run() {
        let err = AgentError::Tool { tool: "x".to_string(), message: "boom".to_string() };
        let c = ErrorClassifier::classify(&err);
        assert!(!c.retryable && !c.fatal);
    }

    #[tokio::test]
    async fn backoff_delays_are_non_decreasing_up_to_cap() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1), Duration::from_millis(8), 2.0);
        assert!(policy.delay_for_attempt(1) <= policy.delay_for_attempt(2));
        assert!(policy.delay_for_attempt(2) <= policy.delay_for_attempt(3));
        assert!(policy.delay_for_attempt(10) <= policy.max_delay);
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_max_retries_plus_one() {
        let (_tx, rx) = watch::channel(false);
        let policy = RetryPolicy::exponential(2, Duration::from_millis(1), Duration::from_millis(2), 2.0);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = policy
            .execute(rx, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::Llm { message: "timeout".to_string(), status: None })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_further_retries() {
        let (tx, rx) = watch::channel(true);
        let _ = tx;
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1), Duration::from_millis(2), 2.0);
        let result = policy
            .execute(rx, || async { Err::<(), _>(AgentError::Llm { message: "timeout".to_string(), status: None }) })
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
