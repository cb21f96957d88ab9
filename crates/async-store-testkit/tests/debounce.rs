//! Debounced tasks and debounced streams

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_store_testkit::*;

const TIMEOUT: Duration = Duration::from_secs(5);
const DELAY: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn test_rapid_debounce_runs_once_with_last_value() {
    init_test_tracing();
    const THRASH: i64 = 10;

    let (cancellations, mapper) = cancellation_counter();
    let store = Store::new(TestState::default(), TestEnv::default(), mapper).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    for i in 0..THRASH {
        let runs = runs.clone();
        store.receive(Effect::debounce(
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(append(i))
            },
            "Thrash",
            DELAY,
        ));
    }

    let outcome = StoreCondition::new(&store)
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 1, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);

    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(store.state().ints, vec![THRASH - 1]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cancellations.load(Ordering::SeqCst), (THRASH - 1) as usize);
    assert!(!store.is_registered(&Id::from("Thrash")));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_waits_for_quiet_period() {
    init_test_tracing();
    let store = test_store();
    let start = tokio::time::Instant::now();

    store.receive(Effect::debounce(async { Ok(append(1)) }, "quiet", DELAY));

    let outcome = StoreCondition::new(&store)
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 1, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert!(start.elapsed() >= DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_spaced_debounces_each_run() {
    init_test_tracing();
    let store = test_store();

    store.receive(Effect::debounce(async { Ok(append(1)) }, "spaced", DELAY));
    tokio::time::sleep(DELAY * 2).await;
    store.receive(Effect::debounce(async { Ok(append(2)) }, "spaced", DELAY));
    tokio::time::sleep(DELAY * 2).await;

    assert_eq!(store.state().ints, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_pending_debounce() {
    init_test_tracing();
    let store = test_store();

    store.receive(Effect::debounce(async { Ok(append(1)) }, "pending", DELAY));
    store.receive(Effect::cancel("pending"));
    tokio::time::sleep(DELAY * 2).await;

    assert!(store.state().ints.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_debounced_stream_drives_one_update() {
    init_test_tracing();
    let source: Store<String> = Store::new(String::new(), (), |_| Effect::None).unwrap();
    let counter = test_store();

    let values = source
        .stream("Counter.Source.Stream", |s: &String| s.clone(), None)
        .debounce(Duration::from_millis(250));
    counter
        .bind_stream("Counter.Source", values, |value: String| {
            Effect::set(move |s: &mut TestState| {
                s.value = value;
                s.ints.push(1);
            })
        })
        .unwrap();

    for i in 0..=100 {
        source.receive(Effect::set(move |s: &mut String| *s = i.to_string()));
    }

    let source_done = StoreCondition::new(&source)
        .wait_for_value(|s: &String| s.clone(), "100".to_string(), TIMEOUT)
        .await;
    let counted = StoreCondition::new(&counter)
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 1, TIMEOUT)
        .await;
    counter.receive(Effect::cancel("Counter.Source"));

    assert_eq!(source_done, WaitState::Completed);
    assert_eq!(counted, WaitState::Completed);
    assert_eq!(counter.state().ints.len(), 1);
    assert_eq!(counter.state().value, "100");
}
