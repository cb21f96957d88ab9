//! Waiting for a number of state changes

use std::time::Duration;

use async_store::{Store, StoreError, StoreResult};
use tokio::sync::broadcast::{self, error::RecvError};

/// Counts will-change notifications of a store.
///
/// Subscribes on construction, so create it before submitting the effects
/// being waited for.
#[derive(Debug)]
pub struct StoreWaiter {
    expected: usize,
    notifications: broadcast::Receiver<()>,
}

impl StoreWaiter {
    /// Waiter expecting `expected` state changes
    pub fn new<S, E>(store: &Store<S, E>, expected: usize) -> Self
    where
        S: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        Self {
            expected,
            notifications: store.subscribe_will_change(),
        }
    }

    /// Wait until the expected number of changes happened.
    ///
    /// Returns the number observed, or [`StoreError::Timeout`] if `timeout`
    /// elapses first.
    pub async fn wait(mut self, timeout: Duration) -> StoreResult<usize> {
        let expected = self.expected;
        let counting = async {
            let mut count = 0;
            while count < expected {
                match self.notifications.recv().await {
                    Ok(()) => count += 1,
                    Err(RecvError::Lagged(missed)) => {
                        count += usize::try_from(missed).unwrap_or(usize::MAX);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            count
        };

        let count = tokio::time::timeout(timeout, counting)
            .await
            .map_err(|_| StoreError::timeout(timeout))?;
        if count < expected {
            tracing::warn!(count, expected, "store dropped before expected changes");
            return Err(StoreError::operation(format!(
                "store dropped after {count} of {expected} changes"
            )));
        }
        Ok(count)
    }
}
