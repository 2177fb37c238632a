//! Retry and Timeout Wrapper
//!
//! Runs an attempt factory up to `retries + 1` times. Each attempt may be
//! bounded by a deadline; an attempt that overruns is dropped and counts as
//! a timeout failure. Retries fire immediately, without backoff.
//!
//! When a cancellation token is supplied, it is checked before every attempt
//! and raced against the attempt while it runs. ERROR and EXIT steps run
//! without a token so cleanup is never interrupted.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::StepError;

/// Attempt budget and per-attempt deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Option<Duration>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Option<Duration>, retries: u32) -> Self {
        Self { timeout, retries }
    }

    /// Total attempts allowed.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Result of running under a policy, with the number of attempts made.
#[derive(Debug)]
pub struct PolicyOutcome<T> {
    pub result: Result<T, StepError>,
    pub attempts: u32,
}

impl<T> PolicyOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PolicyOutcome<U> {
        PolicyOutcome {
            result: self.result.map(f),
            attempts: self.attempts,
        }
    }
}

/// Runs `attempt` under `policy`.
///
/// Returns the first success, the last failure once attempts run out, or
/// [`StepError::Cancelled`] as soon as cancellation is observed.
pub async fn run_with_policy<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut attempt: F,
) -> PolicyOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let total = policy.attempts();
    let mut last_error = StepError::Execution(format!("Step '{}' made no attempts", label));

    for n in 1..=total {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            debug!("Step '{}' cancelled before attempt {}", label, n);
            return PolicyOutcome {
                result: Err(StepError::Cancelled),
                attempts: n - 1,
            };
        }

        debug!("Step '{}' attempt {}/{}", label, n, total);

        match bounded(attempt(), policy.timeout, cancel).await {
            Ok(value) => {
                return PolicyOutcome {
                    result: Ok(value),
                    attempts: n,
                }
            }
            Err(StepError::Cancelled) => {
                debug!("Step '{}' cancelled during attempt {}", label, n);
                return PolicyOutcome {
                    result: Err(StepError::Cancelled),
                    attempts: n,
                };
            }
            Err(err) => {
                if n < total {
                    warn!("Step '{}' attempt {}/{} failed: {} - retrying", label, n, total, err);
                } else {
                    debug!("Step '{}' attempt {}/{} failed: {}", label, n, total, err);
                }
                last_error = err;
            }
        }
    }

    PolicyOutcome {
        result: Err(last_error),
        attempts: total,
    }
}

/// Awaits one attempt, applying the deadline and racing cancellation.
/// An attempt that is already finished wins over a pending cancellation.
async fn bounded<T, Fut>(
    fut: Fut,
    timeout: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<T, StepError>
where
    Fut: Future<Output = Result<T, StepError>>,
{
    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(StepError::Timeout(limit))),
            None => fut.await,
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                result = timed => result,
                _ = token.cancelled() => Err(StepError::Cancelled),
            }
        }
        None => timed.await,
    }
}
