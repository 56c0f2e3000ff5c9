//! Balance-change verification
//!
//! The transaction-submission call itself carries no economic
//! confirmation; only an observed balance delta is trustworthy evidence of
//! settlement. This module polls any `U256` reading until it has moved by
//! at least the expected amount (within tolerance) or the attempt budget
//! is spent. Exhaustion is a distinct terminal outcome, not an error: the
//! underlying transaction may well have settled behind indexer lag, so
//! callers surface a degraded success instead of a hard failure.

use crate::retry::{poll_until, PollOutcome, RetryPolicy};
use alloy::primitives::U256;
use std::future::Future;

/// Which way the balance is expected to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDirection {
    Decrease,
    Increase,
}

/// Verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The delta reached the tolerance-adjusted threshold.
    Verified { observed: U256 },
    /// The attempt budget ran out before the delta was observed.
    Exhausted,
}

/// Whether a settled operation could be confirmed by its balance delta.
///
/// `Unverified` must never be presented as a normal success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Verified,
    Unverified,
}

impl From<Verification> for SettleOutcome {
    fn from(verification: Verification) -> Self {
        match verification {
            Verification::Verified { .. } => SettleOutcome::Verified,
            Verification::Exhausted => SettleOutcome::Unverified,
        }
    }
}

/// Tolerance applied to expected deltas, accommodating fee and slippage
/// rounding: a move of at least 90% of the expectation verifies.
pub const DELTA_TOLERANCE_PCT: u8 = 10;

/// Poll `fetch` until the balance has moved from `baseline` by at least
/// `expected × (100 − tolerance_pct) / 100` in the given direction.
///
/// A `None` from `fetch` (failed query) counts as "not yet verified" and
/// the loop keeps polling; it never errors out of the loop.
pub async fn verify_delta<F, Fut>(
    baseline: U256,
    expected: U256,
    direction: DeltaDirection,
    tolerance_pct: u8,
    policy: RetryPolicy,
    mut fetch: F,
) -> Verification
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<U256>>,
{
    let threshold = expected * U256::from(100 - tolerance_pct.min(100) as u64) / U256::from(100u64);

    let outcome = poll_until(policy, |attempt| {
        let current_fut = fetch();
        async move {
            let current = current_fut.await?;
            let delta = match direction {
                DeltaDirection::Decrease => baseline.saturating_sub(current),
                DeltaDirection::Increase => current.saturating_sub(baseline),
            };
            if delta >= threshold {
                Some(current)
            } else {
                tracing::debug!(
                    attempt,
                    %baseline,
                    %current,
                    %delta,
                    %threshold,
                    "balance delta below threshold, continuing"
                );
                None
            }
        }
    })
    .await;

    match outcome {
        PollOutcome::Completed(observed) => {
            tracing::info!(%baseline, %observed, "balance change verified");
            Verification::Verified { observed }
        }
        PollOutcome::Exhausted => {
            tracing::warn!(
                %baseline,
                %expected,
                "verification budget exhausted without observing the expected delta"
            );
            Verification::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffSchedule;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::ZERO,
            BackoffSchedule::Fixed(Duration::from_millis(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn verifies_at_exact_tolerance_threshold() {
        // baseline 100.00, expected decrease 10.00, tolerance 10%:
        // an observed balance of 91.00 (delta 9.00 >= 9.00) verifies
        let outcome = verify_delta(
            U256::from(10_000u64),
            U256::from(1_000u64),
            DeltaDirection::Decrease,
            10,
            fast_policy(5),
            || async { Some(U256::from(9_100u64)) },
        )
        .await;
        assert_eq!(
            outcome,
            Verification::Verified {
                observed: U256::from(9_100u64)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_below_threshold_until_exhausted() {
        // observed delta of 5.00 against an expected 10.00 never verifies
        let attempts = AtomicU32::new(0);
        let outcome = verify_delta(
            U256::from(10_000u64),
            U256::from(1_000u64),
            DeltaDirection::Decrease,
            10,
            fast_policy(6),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Some(U256::from(9_500u64)) }
            },
        )
        .await;
        assert_eq!(outcome, Verification::Exhausted);
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn increase_direction_verifies_received_amount() {
        // expecting to receive 2.50, tolerance 10% -> 2.25 suffices
        let balances = Mutex::new(VecDeque::from(vec![
            U256::from(0u64),
            U256::from(100u64),
            U256::from(230u64),
        ]));
        let outcome = verify_delta(
            U256::ZERO,
            U256::from(250u64),
            DeltaDirection::Increase,
            10,
            fast_policy(10),
            || {
                let next = balances.lock().unwrap().pop_front();
                async move { next.or(Some(U256::from(230u64))) }
            },
        )
        .await;
        assert_eq!(
            outcome,
            Verification::Verified {
                observed: U256::from(230u64)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_is_retried_not_fatal() {
        let calls = AtomicU32::new(0);
        let outcome = verify_delta(
            U256::from(1_000u64),
            U256::from(100u64),
            DeltaDirection::Decrease,
            10,
            fast_policy(5),
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        None // query failure
                    } else {
                        Some(U256::from(900u64))
                    }
                }
            },
        )
        .await;
        assert!(matches!(outcome, Verification::Verified { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn settle_outcome_from_verification() {
        assert_eq!(
            SettleOutcome::from(Verification::Verified {
                observed: U256::ZERO
            }),
            SettleOutcome::Verified
        );
        assert_eq!(
            SettleOutcome::from(Verification::Exhausted),
            SettleOutcome::Unverified
        );
    }
}
