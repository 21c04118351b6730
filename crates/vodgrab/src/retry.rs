// Retry-with-backoff shared by playlist, key and segment fetching.
//
// The classifier decides whether and how an error is retried; this module
// only runs the resulting deterministic loop.

use crate::error::DownloadError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff delay for attempt `k` (1-indexed): `base * 2^(k-1)` plus additive
/// jitter of up to `100 + 50*k` milliseconds.
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    let multiplier = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let exp = base.checked_mul(multiplier).unwrap_or(Duration::MAX);
    let jitter_cap_ms = 100 + 50 * u64::from(attempt);
    let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_cap_ms));
    exp.saturating_add(jitter)
}

/// Execute `operation` until it succeeds, fails terminally, or exhausts the
/// attempt budget its own error classification allows.
///
/// The closure receives the current attempt number (1-indexed). Each error is
/// classified via [`DownloadError::category`]; a non-retryable category or an
/// exhausted chain returns the error as-is. The backoff sleep races the
/// cancellation token.
pub async fn retry_with_backoff<F, Fut, T>(
    token: &CancellationToken,
    site: &str,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut attempt: u32 = 1;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if matches!(err, DownloadError::Cancelled) {
            return Err(err);
        }

        let directive = err.category().directive();
        if directive.max_attempts == 0 || attempt >= directive.max_attempts {
            return Err(err);
        }

        let delay = delay_for_attempt(directive.base_delay, attempt);
        warn!(
            site = site,
            attempt = attempt,
            max = directive.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
