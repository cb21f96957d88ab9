//! Effect algebra behaviour through a running store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_store_testkit::*;
use futures::StreamExt;
use proptest::prelude::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn delayed_append(delay_ms: u64, value: i64) -> Effect<TestState> {
    Effect::task(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(append(value))
    })
}

#[tokio::test]
async fn test_init_keeps_state_and_env() {
    init_test_tracing();
    let state = TestState {
        value: "init".into(),
        ..TestState::default()
    };
    let env = TestEnv {
        value: "env".into(),
    };
    let store = Store::new(state.clone(), env.clone(), |_| Effect::None).unwrap();

    assert_eq!(store.state(), state);
    assert_eq!(store.env(), &env);
}

#[tokio::test(start_paused = true)]
async fn test_none_effect_leaves_state() {
    init_test_tracing();
    let store = test_store();

    store.receive(Effect::None);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(store.state(), TestState::default());
}

#[tokio::test(start_paused = true)]
async fn test_set_effect() {
    init_test_tracing();
    let store = test_store();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::set(|s: &mut TestState| s.value = "New Value".into()));

    let outcome = condition
        .wait_for_value(|s: &TestState| s.value.clone(), "New Value".to_string(), TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_task_inside_concatenate_completes_before_next() {
    init_test_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let store = test_store();
    let condition = StoreCondition::new(&store);

    let counted = runs.clone();
    store.receive(Effect::concatenate([
        Effect::task(async move {
            counted.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Effect::set(|s: &mut TestState| s.value = "Done".into()))
        }),
        Effect::set(|s: &mut TestState| s.is_completed = true),
    ]));

    let outcome = condition
        .wait_for_value(|s: &TestState| s.is_completed, true, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(store.state().value, "Done");
}

#[tokio::test(start_paused = true)]
async fn test_merge_members_complete_in_any_order() {
    init_test_tracing();
    let store = test_store();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::merge([delayed_append(200, 1), delayed_append(100, 2)]));

    let outcome = condition
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 2, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert_eq!(store.state().ints, vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_concatenate_members_never_overlap() {
    init_test_tracing();
    let store = test_store();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::concatenate([
        delayed_append(200, 1),
        delayed_append(100, 2),
    ]));

    let outcome = condition
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 2, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert_eq!(store.state().ints, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_nested_concatenate_keeps_order() {
    init_test_tracing();
    let store = test_store();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::concatenate([
        delayed_append(300, 1),
        Effect::concatenate([delayed_append(200, 2), delayed_append(100, 3)]),
        Effect::merge([delayed_append(50, 4)]),
        append(5),
    ]));

    let outcome = condition
        .wait(|s: &TestState| s.ints.len(), |n: &usize| *n == 5, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert_eq!(store.state().ints, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_operation_error_is_mapped() {
    init_test_tracing();
    let store = Store::new(TestState::default(), TestEnv::default(), |error| {
        Effect::set(move |s: &mut TestState| s.value = error.to_string())
    })
    .unwrap();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::task(async { Err(StoreError::operation("boom")) }));

    let outcome = condition
        .wait(|s: &TestState| s.value.clone(), |v: &String| !v.is_empty(), TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert_eq!(store.state().value, "Operation failed: boom");
}

#[tokio::test(start_paused = true)]
async fn test_data_task_uses_captured_data() {
    init_test_tracing();
    let store = test_store();
    let condition = StoreCondition::new(&store);

    store.receive(Effect::data_task(
        vec![7, 8],
        |data: Vec<i64>| async move {
            Ok(Effect::set(move |s: &mut TestState| s.ints.extend(data)))
        },
        None,
    ));

    let outcome = condition
        .wait_for_value(|s: &TestState| s.ints.clone(), vec![7, 8], TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_delays_following_members() {
    init_test_tracing();
    let store = test_store();
    let start = tokio::time::Instant::now();

    store.receive(Effect::concatenate([
        Effect::sleep(Duration::from_millis(250)),
        Effect::set(|s: &mut TestState| s.is_completed = true),
    ]));

    let outcome = StoreCondition::new(&store)
        .wait_for_value(|s: &TestState| s.is_completed, true, TIMEOUT)
        .await;
    assert_eq!(outcome, WaitState::Completed);
    assert!(start.elapsed() >= Duration::from_millis(250));
}

proptest! {
    #[test]
    fn prop_snapshots_follow_submission_order(values in proptest::collection::vec(any::<i64>(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let submitted = values.clone();
        let snapshots = runtime.block_on(async move {
            let store = test_store();
            let mut snapshots = store.stream("snapshots", |s: &TestState| s.ints.clone(), None);
            assert_eq!(snapshots.next().await, Some(Vec::new()));

            for value in &submitted {
                store.receive(append(*value));
            }
            let mut seen = Vec::with_capacity(submitted.len());
            for _ in 0..submitted.len() {
                seen.push(snapshots.next().await.unwrap());
            }
            seen
        });

        for (n, snapshot) in snapshots.iter().enumerate() {
            prop_assert_eq!(snapshot, &values[..=n].to_vec());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_waiter_counts_state_changes() {
    init_test_tracing();
    let store = test_store();
    let waiter = StoreWaiter::new(&store, 3);

    store.receive(Effect::concatenate([append(1), append(2)]));
    store.receive(delayed_append(100, 3));

    assert_eq!(waiter.wait(TIMEOUT).await.unwrap(), 3);
    assert_eq!(store.state().ints, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_times_out_without_changes() {
    init_test_tracing();
    let store = test_store();

    let result = StoreWaiter::new(&store, 1)
        .wait(Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(StoreError::Timeout { waited_ms: 100 })));
}

#[tokio::test(start_paused = true)]
async fn test_merge_in_concatenate_waits_for_slowest_member() {
    init_test_tracing();
    let store = test_store();
    store.receive(Effect::concatenate([
        Effect::merge([delayed_append(300, 1), delayed_append(100, 2)]),
        append(3),
    ]));

    let all_applied = {
        let store = store.clone();
        async move {
            while store.state().ints.len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    };
    assert_pending_for(Duration::from_millis(250), async {
        while !store.state().ints.contains(&3) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_completes_within(TIMEOUT, all_applied).await;

    assert_eq!(store.state().ints, vec![2, 1, 3]);
}
