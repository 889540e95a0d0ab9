//! Retry logic with per-node configurable backoff for pipeline node execution.

use std::time::Duration;

use crate::graph::PipelineNode;

/// A node's resolved retry configuration, built from its DOT attributes
/// (`max_attempts`/`retries`, `backoff_base`/`retry_delay`,
/// `backoff_multiplier`/`retry_backoff`, `backoff_max`, `retry_on_fail`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first — 1 means "no retry".
    pub max_attempts: usize,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
    /// When true, a [`attractor_types::StageStatus::Fail`] outcome is retried
    /// the same as a [`attractor_types::StageStatus::Retry`] outcome.
    pub retry_on_fail: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_secs(30),
            retry_on_fail: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_node(node: &PipelineNode) -> Self {
        let default = Self::default();
        RetryPolicy {
            max_attempts: node
                .max_attempts
                .map(|n| n.max(1) as usize)
                .unwrap_or(default.max_attempts),
            backoff_base: node.backoff_base.unwrap_or(default.backoff_base),
            backoff_multiplier: node.backoff_multiplier.unwrap_or(default.backoff_multiplier),
            backoff_max: node.backoff_max.unwrap_or(default.backoff_max),
            retry_on_fail: node.retry_on_fail,
        }
    }

    /// Compute the delay before the given attempt (0-indexed: the delay
    /// taken *before* attempt N, for N >= 1).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let millis =
            self.backoff_base.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = millis.min(self.backoff_max.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Execute a handler with retry logic.
///
/// The closure `f` is called up to `policy.max_attempts` times. A retry
/// occurs when:
/// - the outcome status is [`attractor_types::StageStatus::Retry`], or
/// - the outcome status is [`attractor_types::StageStatus::Fail`] and
///   `policy.retry_on_fail` is set, or
/// - the returned error satisfies [`attractor_types::AttractorError::is_retryable`]
///
/// and this was not the last permitted attempt. Between retries, sleeps for
/// the duration dictated by `policy`.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    policy: &RetryPolicy,
    node_id: &str,
) -> attractor_types::Result<attractor_types::Outcome>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = attractor_types::Result<attractor_types::Outcome>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..max_attempts {
        let is_last = attempt + 1 == max_attempts;
        match f().await {
            Ok(outcome) => {
                let retryable_status = outcome.status == attractor_types::StageStatus::Retry
                    || (outcome.status == attractor_types::StageStatus::Fail && policy.retry_on_fail);
                if retryable_status && !is_last {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::info!(node = %node_id, attempt, delay_ms = %delay.as_millis(), "retrying node");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(outcome);
            }
            Err(e) if e.is_retryable() && !is_last => {
                last_err = Some(e);
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(node = %node_id, attempt, delay_ms = %delay.as_millis(), "retryable error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| attractor_types::AttractorError::RetriesExhausted {
        node: node_id.to_string(),
        attempts: max_attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attractor_types::{AttractorError, Outcome, StageStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::ZERO,
            backoff_multiplier: 2.0,
            backoff_max: Duration::ZERO,
            retry_on_fail: false,
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let result = execute_with_retry(|| async { Ok(Outcome::success("done")) }, &policy(3), "node_a").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes, "done");
    }

    #[tokio::test]
    async fn retry_on_retryable_error_succeeds() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(AttractorError::RateLimited {
                            provider: "test".into(),
                            retry_after_ms: 100,
                        })
                    } else {
                        Ok(Outcome::success("recovered"))
                    }
                }
            },
            &policy(3),
            "node_b",
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_attempts_exhausted() {
        let result = execute_with_retry(
            || async {
                Err(AttractorError::RateLimited {
                    provider: "test".into(),
                    retry_after_ms: 0,
                })
            },
            &policy(3),
            "node_c",
        )
        .await;

        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), AttractorError::RateLimited { .. }));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_millis(500),
            retry_on_fail: false,
        };
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn non_default_multiplier_is_honored() {
        let p = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 3.0,
            backoff_max: Duration::from_secs(30),
            retry_on_fail: false,
        };
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(900));
    }

    #[tokio::test]
    async fn retry_on_retry_status_outcome() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Ok(Outcome::with_label(StageStatus::Retry, "retry_edge"))
                    } else {
                        Ok(Outcome::success("finally"))
                    }
                }
            },
            &policy(5),
            "node_d",
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes, "finally");
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_no_retry() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(AttractorError::AuthError { provider: "test".into() })
                }
            },
            &policy(5),
            "node_e",
        )
        .await;

        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), AttractorError::AuthError { .. }));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_backoff_base_is_zero_delay() {
        let p = policy(3);
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(99), Duration::ZERO);
    }

    #[test]
    fn default_policy_is_exponential_with_500ms_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retry_status_on_final_attempt_returned_as_is() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::with_label(StageStatus::Retry, "retry_edge"))
                }
            },
            &policy(3),
            "node_f",
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Retry);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_on_fail_flag_retries_fail_status() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let mut p = policy(3);
        p.retry_on_fail = true;

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Ok(Outcome::fail("transient"))
                    } else {
                        Ok(Outcome::success("recovered"))
                    }
                }
            },
            &p,
            "node_g",
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fail_status_not_retried_without_flag() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::fail("permanent"))
                }
            },
            &policy(3),
            "node_h",
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
