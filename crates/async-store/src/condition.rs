//! Waiting for a store condition with a deadline
//!
//! A condition task and a timeout task race; whichever settles the shared
//! atomic first wins and the other is cancelled.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::errors::{StoreError, StoreResult};
use crate::id::Id;
use crate::store::Store;

const WAITING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

static NEXT_CONDITION: AtomicU64 = AtomicU64::new(1);

/// Outcome of [`StoreCondition::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// The predicate held before the deadline
    Completed,
    /// The deadline elapsed first
    TimedOut,
}

impl WaitState {
    /// `Err(StoreError::Timeout)` when timed out
    pub fn into_result(self, timeout: Duration) -> StoreResult<()> {
        match self {
            Self::Completed => Ok(()),
            Self::TimedOut => Err(StoreError::timeout(timeout)),
        }
    }
}

fn settle(outcome: &AtomicU8, state: u8) -> bool {
    outcome
        .compare_exchange(WAITING, state, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Waits for a projection of a store's state to satisfy a predicate.
#[derive(Debug)]
pub struct StoreCondition<S, E = ()> {
    store: Store<S, E>,
    id: Id,
}

impl<S, E> StoreCondition<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Condition helper over `store`
    pub fn new(store: &Store<S, E>) -> Self {
        let serial = NEXT_CONDITION.fetch_add(1, Ordering::Relaxed);
        Self {
            store: store.clone(),
            id: Id::from(format!("StoreCondition.{serial}")),
        }
    }

    /// Wait until `predicate(selector(state))` holds or `timeout` elapses.
    ///
    /// The current state counts. The derived stream used for waiting is
    /// closed before returning.
    pub async fn wait<T>(
        &self,
        selector: impl Fn(&S) -> T + Send + 'static,
        predicate: impl Fn(&T) -> bool + Send + 'static,
        timeout: Duration,
    ) -> WaitState
    where
        T: PartialEq + Clone + Send + 'static,
    {
        let outcome = Arc::new(AtomicU8::new(WAITING));
        let mut values = self.store.stream(self.id.clone(), selector, None);

        let mut condition = tokio::spawn({
            let outcome = outcome.clone();
            async move {
                while let Some(value) = values.next().await {
                    if predicate(&value) {
                        settle(&outcome, COMPLETED);
                        return;
                    }
                }
            }
        });
        let mut deadline = tokio::spawn({
            let outcome = outcome.clone();
            async move {
                tokio::time::sleep(timeout).await;
                settle(&outcome, TIMED_OUT);
            }
        });

        let condition_finished = tokio::select! {
            _ = &mut condition => true,
            _ = &mut deadline => false,
        };
        // A stream that ended without a match leaves only the deadline.
        if condition_finished && outcome.load(Ordering::SeqCst) == WAITING {
            let _ = (&mut deadline).await;
        }
        condition.abort();
        deadline.abort();
        self.store.close_stream(&self.id);

        match outcome.load(Ordering::SeqCst) {
            COMPLETED => WaitState::Completed,
            _ => WaitState::TimedOut,
        }
    }

    /// Wait until `selector(state) == expected`
    pub async fn wait_for_value<T>(
        &self,
        selector: impl Fn(&S) -> T + Send + 'static,
        expected: T,
        timeout: Duration,
    ) -> WaitState
    where
        T: PartialEq + Clone + Send + Sync + 'static,
    {
        self.wait(selector, move |value| *value == expected, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_value_arrives() {
        let store: Store<u32> = Store::new(0, (), |_| Effect::None).unwrap();
        let condition = StoreCondition::new(&store);

        store.receive(Effect::concatenate([
            Effect::sleep(Duration::from_millis(100)),
            Effect::set(|s| *s = 7),
        ]));

        let state = condition
            .wait_for_value(|s| *s, 7, Duration::from_secs(5))
            .await;
        assert_eq!(state, WaitState::Completed);
        assert!(state.into_result(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let store: Store<u32> = Store::new(0, (), |_| Effect::None).unwrap();
        let condition = StoreCondition::new(&store);

        let state = condition
            .wait(|s| *s, |v| *v > 10, Duration::from_millis(500))
            .await;
        assert_eq!(state, WaitState::TimedOut);
        assert!(matches!(
            state.into_result(Duration::from_millis(500)),
            Err(StoreError::Timeout { waited_ms: 500 })
        ));
    }

    #[tokio::test]
    async fn test_current_state_counts() {
        let store: Store<u32> = Store::new(3, (), |_| Effect::None).unwrap();
        let state = StoreCondition::new(&store)
            .wait_for_value(|s| *s, 3, Duration::from_secs(1))
            .await;
        assert_eq!(state, WaitState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_still_times_out() {
        let store: Store<u32> = Store::new(0, (), |_| Effect::None).unwrap();
        let condition = StoreCondition::new(&store);
        let waiter = tokio::spawn(async move {
            condition
                .wait_for_value(|s| *s, 1, Duration::from_millis(200))
                .await
        });
        tokio::task::yield_now().await;
        store.deactivate();

        assert_eq!(waiter.await.unwrap(), WaitState::TimedOut);
    }
}
