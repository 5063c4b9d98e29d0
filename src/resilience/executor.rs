//! Rate-Limited Request Executor
//!
//! Drives an opaque async operation against an external service: paces
//! attempts, retries transient failures on the backoff schedule, and hands
//! back whatever quota signal the operation surfaced.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backoff::BackoffPolicy;
use super::cancel::{CallContext, Interrupt};
use super::error::ExecutorError;

/// Quota fields an operation read from response headers or payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaHint {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
}

/// Successful result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome<T> {
    pub value: T,
    pub quota: Option<QuotaHint>,
}

impl<T> CallOutcome<T> {
    pub fn new(value: T) -> Self {
        Self { value, quota: None }
    }

    pub fn with_quota(mut self, remaining: Option<u64>, limit: Option<u64>) -> Self {
        self.quota = Some(QuotaHint { remaining, limit });
        self
    }
}

/// Final result of an execution, with the retry trail that led to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub value: T,
    pub quota: Option<QuotaHint>,
    pub attempts: u32,
    /// Backoff delays actually slept, in order.
    pub delays: Vec<Duration>,
}

pub struct RequestExecutor {
    policy: BackoffPolicy,
    rng: Mutex<StdRng>,
    pacer: Option<DefaultDirectRateLimiter>,
}

impl RequestExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
            pacer: None,
        }
    }

    /// Deterministic jitter, for tests and replay.
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            pacer: None,
        }
    }

    /// Space attempts out to at most `per_minute` calls (bursts up to the same amount).
    pub fn with_rate_limit(mut self, per_minute: NonZeroU32) -> Self {
        self.pacer = Some(RateLimiter::direct(Quota::per_minute(per_minute)));
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.policy.delay_for(attempt, &mut *rng)
    }

    /// Run `operation` until it succeeds, fails permanently, or spends the
    /// retry budget. Backoff sleeps only suspend this call.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, mut operation: F) -> Result<Executed<T>, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CallOutcome<T>, ExecutorError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut delays = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if let Some(interrupt) = ctx.check() {
                return Err(interrupted(interrupt, attempt));
            }

            if let Some(pacer) = &self.pacer {
                tokio::select! {
                    biased;
                    interrupt = ctx.interrupted() => return Err(interrupted(interrupt, attempt)),
                    _ = pacer.until_ready() => {}
                }
            }

            attempt += 1;
            let result = tokio::select! {
                biased;
                interrupt = ctx.interrupted() => return Err(interrupted(interrupt, attempt)),
                result = operation() => result,
            };

            let err = match result {
                Ok(outcome) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(Executed {
                        value: outcome.value,
                        quota: outcome.quota,
                        attempts: attempt,
                        delays,
                    });
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(attempt, error = %err, "permanent failure, not retrying");
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(attempt, error = %err, "retry budget exhausted");
                return Err(ExecutorError::escalate(err, attempt));
            }

            let delay = self.next_delay(attempt - 1);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );

            tokio::select! {
                biased;
                interrupt = ctx.interrupted() => return Err(interrupted(interrupt, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
            delays.push(delay);
        }
    }
}

fn interrupted(interrupt: Interrupt, attempts: u32) -> ExecutorError {
    match interrupt {
        Interrupt::Cancelled => ExecutorError::Cancelled { attempts },
        Interrupt::DeadlineExceeded => ExecutorError::DeadlineExceeded { attempts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CancelHandle;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_attempts: u32, jitter: f64) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(2), jitter, max_attempts).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_quota_through() {
        let executor = RequestExecutor::with_seed(policy(3, 0.0), 1);
        let out = executor
            .execute(&CallContext::new(), || async {
                Ok(CallOutcome::new("ok").with_quota(Some(900), Some(1000)))
            })
            .await
            .unwrap();

        assert_eq!(out.value, "ok");
        assert_eq!(out.attempts, 1);
        assert!(out.delays.is_empty());
        assert_eq!(out.quota, Some(QuotaHint { remaining: Some(900), limit: Some(1000) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausts_after_max_attempts() {
        let executor = RequestExecutor::with_seed(policy(3, 0.0), 1);
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result: Result<Executed<()>, _> = executor
            .execute(&CallContext::new(), || {
                calls.lock().unwrap().push(Instant::now());
                async { Err(ExecutorError::RateLimited("429 Too Many Requests".into())) }
            })
            .await;

        assert!(matches!(result, Err(ExecutorError::RateLimitExceeded { attempts: 3, .. })));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(100) && gaps[0] < Duration::from_millis(102));
        assert!(gaps[1] >= Duration::from_millis(200) && gaps[1] < Duration::from_millis(202));
        assert!(gaps[1] >= gaps[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_delays_non_decreasing() {
        let executor = RequestExecutor::with_seed(policy(5, 0.1), 1234);
        let calls = AtomicU32::new(0);

        let out = executor
            .execute(&CallContext::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        Err(ExecutorError::Timeout("read timed out".into()))
                    } else {
                        Ok(CallOutcome::new(n))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out.attempts, 5);
        assert_eq!(out.delays.len(), 4);
        assert!(out.delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(out.delays.iter().all(|d| *d <= Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let executor = RequestExecutor::with_seed(policy(5, 0.0), 1);
        let calls = AtomicU32::new(0);

        let result: Result<Executed<()>, _> = executor
            .execute(&CallContext::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecutorError::NotFound("issue ENG-42".into())) }
            })
            .await;

        assert_eq!(result, Err(ExecutorError::NotFound("issue ENG-42".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_escalate_to_exhausted_retries() {
        let executor = RequestExecutor::with_seed(policy(2, 0.0), 1);
        let result: Result<Executed<()>, _> = executor
            .execute(&CallContext::new(), || async { Err(ExecutorError::Connection("reset by peer".into())) })
            .await;

        match result {
            Err(ExecutorError::ExhaustedRetries { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("reset by peer"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let slow = BackoffPolicy::new(Duration::from_secs(10), 2.0, Duration::from_secs(60), 0.0, 5).unwrap();
        let executor = RequestExecutor::with_seed(slow, 1);
        let handle = CancelHandle::new();
        let ctx = CallContext::new().with_cancel(handle.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let result: Result<Executed<()>, _> = executor
            .execute(&ctx, || async { Err(ExecutorError::RateLimited("slow down".into())) })
            .await;

        assert_eq!(result, Err(ExecutorError::Cancelled { attempts: 1 }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_retry_loop() {
        let p = BackoffPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(60), 0.0, 10).unwrap();
        let executor = RequestExecutor::with_seed(p, 1);
        let ctx = CallContext::new().with_timeout(Duration::from_secs(3));
        let calls = AtomicU32::new(0);

        let result: Result<Executed<()>, _> = executor
            .execute(&ctx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExecutorError::Timeout("gateway".into())) }
            })
            .await;

        assert_eq!(result, Err(ExecutorError::DeadlineExceeded { attempts: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls() {
        let executor = RequestExecutor::new(policy(3, 0.0));
        let handle = CancelHandle::new();
        handle.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<Executed<()>, _> = executor
            .execute(&CallContext::new().with_cancel(handle), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(CallOutcome::new(())) }
            })
            .await;

        assert_eq!(result, Err(ExecutorError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_block_other_calls() {
        let slow = BackoffPolicy::new(Duration::from_secs(30), 2.0, Duration::from_secs(60), 0.0, 2).unwrap();
        let executor = RequestExecutor::with_seed(slow, 1);
        let ctx = CallContext::new();
        let start = Instant::now();
        let failing = AtomicU32::new(0);

        let retrying = executor.execute(&ctx, || {
            let n = failing.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ExecutorError::RateLimited("busy".into()))
                } else {
                    Ok(CallOutcome::new("late"))
                }
            }
        });
        let quick = async {
            let out = executor.execute(&ctx, || async { Ok(CallOutcome::new("early")) }).await;
            (out, start.elapsed())
        };

        let (late, (early, early_at)) = tokio::join!(retrying, quick);
        assert_eq!(early.unwrap().value, "early");
        assert!(early_at < Duration::from_secs(30));
        assert_eq!(late.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_pacer_admits_burst() {
        let executor = RequestExecutor::new(policy(1, 0.0)).with_rate_limit(NonZeroU32::new(600).unwrap());
        for i in 0..5 {
            let out = executor
                .execute(&CallContext::new(), || async move { Ok(CallOutcome::new(i)) })
                .await
                .unwrap();
            assert_eq!(out.value, i);
        }
    }
}
