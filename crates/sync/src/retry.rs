//! Retrying registry requests.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use skiff_config::SyncConfig;
use skiff_registry::error::Result as RegistryResult;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ErrorKind, Result};

/// Longest single pause between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Run `request` until it succeeds or fails with an error that is not
/// transient, sleeping with exponential backoff between attempts. At most
/// `max_retries` retries follow the first attempt.
///
/// The outer error is cancellation only. The inner result is the registry's
/// final answer, left to the caller to interpret.
pub(crate) async fn retrying<T, F, Fut>(
    config: &SyncConfig,
    cancel: &CancellationToken,
    what: impl Display,
    mut request: F,
) -> Result<RegistryResult<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RegistryResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        let e = match request().await {
            Ok(value) => return Ok(Ok(value)),
            Err(e) => e,
        };
        if !e.is_retryable() || attempt >= config.max_retries {
            return Ok(Err(e));
        }
        let delay = backoff(config.retry_backoff_ms, attempt);
        attempt += 1;
        warn!(%what, attempt, delay_ms = delay.as_millis() as u64, error = ?e, "retrying registry request");
        tokio::select! {
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use skiff_registry::error::ErrorKind as RegistryErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_retries: u32) -> SyncConfig {
        SyncConfig { max_retries, retry_backoff_ms: 1, ..SyncConfig::default() }
    }

    /// A request failing with `kind` for its first `failures` attempts.
    async fn failing(calls: &AtomicU32, failures: u32, kind: RegistryErrorKind) -> RegistryResult<u32> {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        if call < failures {
            exn::bail!(kind);
        }
        Ok(call)
    }

    #[rstest]
    #[case(0, 250)]
    #[case(1, 500)]
    #[case(3, 2_000)]
    #[case(7, 30_000)]
    #[case(64, 30_000)]
    fn test_backoff_doubles_and_caps(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(backoff(250, attempt), Duration::from_millis(expected_ms));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let transient = || RegistryErrorKind::Transient("503".into());
        let result = retrying(&config(3), &CancellationToken::new(), "blob", || failing(&calls, 2, transient()))
            .await
            .unwrap();
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let transient = || RegistryErrorKind::Transient("503".into());
        let result = retrying(&config(2), &CancellationToken::new(), "blob", || failing(&calls, 10, transient()))
            .await
            .unwrap();
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_returned_at_once() {
        let calls = AtomicU32::new(0);
        let missing = || RegistryErrorKind::NotFound("blob".into());
        let result =
            retrying(&config(3), &CancellationToken::new(), "blob", || failing(&calls, 10, missing())).await.unwrap();
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let slow = SyncConfig { max_retries: 5, retry_backoff_ms: 60_000, ..SyncConfig::default() };
        let transient = || RegistryErrorKind::Transient("503".into());
        let err = retrying(&slow, &cancel, "blob", || failing(&calls, 10, transient())).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
