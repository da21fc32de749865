//! Generic bounded-attempt polling for long-running platform jobs.
//!
//! Remote bulk and metadata jobs complete in minutes, not milliseconds, so
//! the backoff is linear: the interval grows by a fixed increment every
//! `backoff_every` attempts instead of doubling. Exceeding the attempt budget
//! raises a timeout error distinct from a remote-reported failure.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::BulkLimits;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Polling cadence. Fresh per poll invocation; the loop owns all state.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Initial delay between status checks.
    pub interval: Duration,
    /// Maximum status checks before giving up.
    pub max_attempts: u32,
    /// Number of attempts between interval increases.
    pub backoff_every: u32,
    /// Amount added to the interval at each increase.
    pub backoff_increment: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 500,
            backoff_every: 25,
            backoff_increment: Duration::from_secs(5),
        }
    }
}

impl From<&BulkLimits> for PollOptions {
    fn from(limits: &BulkLimits) -> Self {
        Self {
            interval: limits.poll_interval,
            max_attempts: limits.poll_max_attempts,
            backoff_every: limits.poll_backoff_every,
            backoff_increment: limits.poll_backoff_increment,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Polls `check` until `is_done` accepts its result.
///
/// Each iteration waits the current interval, checks cancellation, fetches
/// the status, and reports it through `on_checked`. Cancellation is checked
/// both before and after each status check, so a cancellation that lands
/// mid-check surfaces as [`AppError::Cancelled`] rather than a stale success.
///
/// Generic over the status shape so the same loop drives bulk-job polling
/// and metadata-retrieve polling.
///
/// # Errors
///
/// - `AppError::Cancelled` - `is_cancelled` returned true
/// - `AppError::PollTimeout` - `max_attempts` checks without a terminal state
/// - Any error returned by `check` itself
pub async fn poll_until_done<S, C, Fut, D, P, X>(
    mut check: C,
    is_done: D,
    options: PollOptions,
    mut on_checked: P,
    is_cancelled: X,
) -> Result<S, AppError>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<S, AppError>>,
    D: Fn(&S) -> bool,
    P: FnMut(&S),
    X: Fn() -> bool,
{
    let mut interval = options.interval;
    let mut attempt: u32 = 0;

    loop {
        tokio::time::sleep(interval).await;

        if is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let status = check().await?;
        on_checked(&status);

        if is_done(&status) {
            // A cancellation that raced the final check still wins.
            if is_cancelled() {
                return Err(AppError::Cancelled);
            }
            return Ok(status);
        }

        attempt += 1;
        if attempt >= options.max_attempts {
            return Err(AppError::PollTimeout { attempts: attempt });
        }

        if attempt % options.backoff_every == 0 {
            interval += options.backoff_increment;
            debug!(
                "[POLL] attempt {} without terminal state, interval now {:?}",
                attempt, interval
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Millisecond-scale options so tests run in real time.
    fn fast_options(max_attempts: u32) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(1),
            max_attempts,
            backoff_every: 25,
            backoff_increment: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn returns_when_third_check_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_check = calls.clone();

        let result = poll_until_done(
            move || {
                let calls = calls_in_check.clone();
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |n| *n == 3,
            fast_options(500),
            |_| {},
            || false,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly 3 checks expected");
    }

    #[tokio::test]
    async fn times_out_after_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_check = calls.clone();

        let result = poll_until_done(
            move || {
                let calls = calls_in_check.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("running")
                }
            },
            |_: &&str| false,
            fast_options(7),
            |_| {},
            || false,
        )
        .await;

        match result.unwrap_err() {
            AppError::PollTimeout { attempts } => assert_eq!(attempts, 7),
            e => panic!("Expected PollTimeout, got: {:?}", e),
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            7,
            "timeout after max_attempts checks, not before"
        );
    }

    #[tokio::test]
    async fn check_errors_propagate() {
        let result: Result<u32, _> = poll_until_done(
            || async { Err(AppError::SalesforceError("[LIMIT] boom".into())) },
            |_| true,
            fast_options(500),
            |_| {},
            || false,
        )
        .await;

        assert!(matches!(result, Err(AppError::SalesforceError(_))));
    }

    #[tokio::test]
    async fn cancellation_before_check_wins() {
        let checked = Arc::new(AtomicU32::new(0));
        let checked_in = checked.clone();

        let result: Result<u32, _> = poll_until_done(
            move || {
                let checked = checked_in.clone();
                async move {
                    checked.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            },
            |_| true,
            fast_options(500),
            |_| {},
            || true,
        )
        .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(
            checked.load(Ordering::SeqCst),
            0,
            "cancellation must be honored before the status check"
        );
    }

    #[tokio::test]
    async fn cancellation_during_final_check_beats_stale_success() {
        // The check itself flips the flag, simulating a cancellation that
        // lands while the status request is in flight.
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag_in_check = cancelled.clone();
        let flag_in_probe = cancelled.clone();

        let result: Result<&str, _> = poll_until_done(
            move || {
                let flag = flag_in_check.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok("done")
                }
            },
            |s| *s == "done",
            fast_options(500),
            |_| {},
            move || flag_in_probe.load(Ordering::SeqCst),
        )
        .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn on_checked_sees_every_status() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in = seen.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let _ = poll_until_done(
            move || {
                let calls = calls_in.clone();
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |n| *n == 4,
            fast_options(500),
            move |_| {
                seen_in.fetch_add(1, Ordering::SeqCst);
            },
            || false,
        )
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn backoff_grows_linearly_every_n_attempts() {
        // 6 attempts with backoff every 2: interval grows after attempts 2
        // and 4. Observe the growth through elapsed wall-clock lower bounds.
        let options = PollOptions {
            interval: Duration::from_millis(2),
            max_attempts: 6,
            backoff_every: 2,
            backoff_increment: Duration::from_millis(2),
        };

        let start = std::time::Instant::now();
        let result: Result<u32, _> = poll_until_done(
            || async { Ok(0) },
            |_| false,
            options,
            |_| {},
            || false,
        )
        .await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(AppError::PollTimeout { attempts: 6 })));
        // Sleeps: 2+2+4+4+6+6 = 24ms minimum.
        assert!(
            elapsed >= Duration::from_millis(24),
            "expected linear backoff to stretch the loop, elapsed {:?}",
            elapsed
        );
    }

    #[test]
    fn options_derive_from_limits() {
        let limits = BulkLimits::default().poll_max_attempts(3);
        let options = PollOptions::from(&limits);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.interval, limits.poll_interval);
        assert_eq!(options.backoff_every, limits.poll_backoff_every);
    }
}
