//! Bounded retry around a [`GridSource`].
//!
//! A grid cell gets at most [`RetryPolicy::max_attempts`] calls, spaced by
//! a fixed [`RetryPolicy::retry_delay`]. Only
//! [`FetchOutcome::TransientError`] is retried; a value or a definitive
//! "no data" answer ends the loop immediately. Every call, successful or
//! not, is followed by [`RetryPolicy::throttle`] so a long run never
//! exceeds the provider's request rate.

use std::time::Duration;

use crate::{FetchOutcome, GridCellKey, GridDataset, GridSource};

/// Attempt budget and pacing for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls per grid cell before giving up. Treated as at least 1.
    pub max_attempts: u32,
    /// Pause between attempts for the same cell.
    pub retry_delay: Duration,
    /// Pause after every remote call.
    pub throttle: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn from_dataset(dataset: &GridDataset) -> Self {
        Self {
            max_attempts: dataset.max_attempts,
            retry_delay: dataset.retry_delay(),
            throttle: dataset.throttle(),
        }
    }

    /// A policy with no pauses, for tests and local sources.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_delay: Duration::ZERO,
            throttle: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1200),
            throttle: Duration::from_millis(200),
        }
    }
}

/// Final result of a retried fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A value was returned.
    Value(f64),
    /// The source answered definitively that there is no value.
    NotAvailable,
    /// Every attempt failed with a transient error.
    Exhausted {
        /// Number of calls made.
        attempts: u32,
        /// Error message from the last attempt.
        last_error: String,
    },
}

/// Fetches `cell` from `source` under `policy`.
///
/// Returns the outcome and the number of remote calls made.
pub async fn fetch_with_retry<S>(
    source: &S,
    cell: &GridCellKey,
    policy: &RetryPolicy,
) -> (RetryOutcome, u32)
where
    S: GridSource + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let outcome = source.fetch(cell).await;
        throttle(policy.throttle).await;

        match outcome {
            FetchOutcome::Value(value) if value.is_finite() => {
                return (RetryOutcome::Value(value), attempt);
            }
            FetchOutcome::Value(_) | FetchOutcome::NotAvailable => {
                return (RetryOutcome::NotAvailable, attempt);
            }
            FetchOutcome::TransientError(e) => {
                log::debug!("  attempt {attempt}/{max_attempts} for {cell} failed: {e}");
                last_error = e;
                if attempt < max_attempts {
                    throttle(policy.retry_delay).await;
                }
            }
        }
    }

    (
        RetryOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        },
        max_attempts,
    )
}

async fn throttle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
