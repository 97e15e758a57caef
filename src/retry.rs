//! Retry Helper (`spec.md` §4.7).
//!
//! A minimal retry wrapper that hands termination entirely to the caller's
//! `decide` closure: no retry count or backoff schedule is baked in here.

use std::future::Future;
use std::time::Duration;

/// Invokes `action`. On failure, calls `decide(retries_so_far, &error)`; if
/// that returns `Some(wait)`, sleeps `wait` and retries with the counter
/// incremented. Returning `None` re-raises the error.
pub async fn retry<A, F, T, E, D>(mut action: A, mut decide: D) -> Result<T, E>
where
    A: FnMut() -> F,
    F: Future<Output = Result<T, E>>,
    D: FnMut(u32, &E) -> Option<Duration>,
{
    let mut retries = 0u32;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(error) => match decide(retries, &error) {
                Some(wait) => {
                    tokio::time::sleep(wait).await;
                    retries += 1;
                }
                None => return Err(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_action_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            |_, _| None,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_decide_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            },
            |retries, _| {
                if retries < 2 {
                    Some(Duration::from_millis(0))
                } else {
                    None
                }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn propagates_error_when_decide_declines_immediately() {
        let result: Result<u32, &str> = retry(|| async { Err("boom") }, |_, _| None).await;
        assert_eq!(result, Err("boom"));
    }
}
