//! Bounded polling with backoff
//!
//! Every wait in this crate — receipt confirmation, balance verification,
//! transfer settlement — goes through the same combinator instead of a
//! hand-rolled loop. Exhaustion is a normal outcome, not an error: callers
//! decide what an unanswered poll means.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Delay progression between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSchedule {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// `step * attempt`, capped.
    Linear { step: Duration, cap: Duration },
}

impl BackoffSchedule {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffSchedule::Fixed(delay) => delay,
            BackoffSchedule::Linear { step, cap } => step.saturating_mul(attempt).min(cap),
        }
    }
}

/// A bounded polling plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    pub schedule: BackoffSchedule,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay: Duration, schedule: BackoffSchedule) -> Self {
        Self {
            max_attempts,
            initial_delay,
            schedule,
        }
    }

    /// Receipt wait for approval transactions: 40 attempts at 2s (~80s).
    pub const fn approval_receipt() -> Self {
        Self::new(
            40,
            Duration::ZERO,
            BackoffSchedule::Fixed(Duration::from_secs(2)),
        )
    }

    /// Receipt wait for swap/stake execution: 60 attempts at 2s (~2min).
    pub const fn execution_receipt() -> Self {
        Self::new(
            60,
            Duration::ZERO,
            BackoffSchedule::Fixed(Duration::from_secs(2)),
        )
    }

    /// Balance verification: 30 attempts, 3s lead-in, 2s/attempt capped at 15s.
    pub const fn balance_verify() -> Self {
        Self::new(
            30,
            Duration::from_secs(3),
            BackoffSchedule::Linear {
                step: Duration::from_secs(2),
                cap: Duration::from_secs(15),
            },
        )
    }
}

/// Result of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Completed(T),
    Exhausted,
}

impl<T> PollOutcome<T> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PollOutcome::Exhausted)
    }
}

/// Run `op` until it yields `Some`, up to the policy's attempt budget.
///
/// `op` receives the 1-based attempt number. A `None` result means "not
/// yet" — individual failures inside `op` must be mapped to `None` by the
/// caller, never propagated.
pub async fn poll_until<T, F, Fut>(policy: RetryPolicy, mut op: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = op(attempt).await {
            return PollOutcome::Completed(value);
        }
        if attempt < policy.max_attempts {
            sleep(policy.schedule.delay_for(attempt)).await;
        }
    }
    PollOutcome::Exhausted
}
