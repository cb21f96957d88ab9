//! Shared store fixtures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_store::{DiagnosticLevel, Effect, Store, StoreConfig, StoreError};

use crate::sink::RecordingSink;

/// State used across the integration suites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestState {
    /// Free-form value
    pub value: String,
    /// Appended integers
    pub ints: Vec<i64>,
    /// Timer tick sequence numbers
    pub ticks: Vec<u64>,
    /// Set at the end of a scenario
    pub is_completed: bool,
}

/// Environment used across the integration suites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestEnv {
    /// Free-form value
    pub value: String,
}

/// Store over the shared fixtures
pub type TestStore = Store<TestState, TestEnv>;

/// Active store with default state and an error mapper returning `None`
pub fn test_store() -> TestStore {
    Store::new(TestState::default(), TestEnv::default(), |_| Effect::None)
        .expect("test store")
}

/// Active store whose diagnostics at or above `min_level` go to a new
/// [`RecordingSink`]
pub fn test_store_with_sink(min_level: DiagnosticLevel) -> (TestStore, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let config = StoreConfig {
        min_diagnostic_level: min_level,
        ..StoreConfig::default()
    };
    let store = Store::builder(TestState::default(), TestEnv::default())
        .config(config)
        .diagnostic_sink(sink.clone())
        .build()
        .expect("test store");
    (store, sink)
}

/// Error mapper counting cancellations, plus the counter it increments
pub fn cancellation_counter(
) -> (Arc<AtomicUsize>, impl Fn(StoreError) -> Effect<TestState> + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let mapper = move |error: StoreError| {
        if error.is_cancelled() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Effect::None
    };
    (count, mapper)
}

/// Effect appending `value` to [`TestState::ints`]
pub fn append(value: i64) -> Effect<TestState> {
    Effect::set(move |state: &mut TestState| state.ints.push(value))
}
