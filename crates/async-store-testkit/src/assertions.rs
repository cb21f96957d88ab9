//! Timing assertions

use std::future::Future;
use std::time::Duration;

/// Await `future`, panicking if it takes longer than `limit`.
pub async fn assert_completes_within<F: Future>(limit: Duration, future: F) -> F::Output {
    match tokio::time::timeout(limit, future).await {
        Ok(output) => output,
        Err(_) => panic!("future did not complete within {limit:?}"),
    }
}

/// Await `future` for `limit`, panicking if it completes.
pub async fn assert_pending_for<F: Future>(limit: Duration, future: F)
where
    F::Output: std::fmt::Debug,
{
    if let Ok(output) = tokio::time::timeout(limit, future).await {
        panic!("future completed within {limit:?} with {output:?}");
    }
}
