//! Distributor channels, standalone and behind store streams

use std::time::Duration;

use async_store_testkit::*;
use futures::StreamExt;

#[tokio::test]
async fn test_close_between_publishes() {
    init_test_tracing();
    for strategy in [MapStrategy::Locked, MapStrategy::Spin] {
        let distributor: Distributor<String> = Distributor::new(strategy, Diagnostics::default());
        let newest = BufferingPolicy::BufferNewest(1);
        let a = distributor.open_channel(Id::from("A"), String::new(), newest);
        let b = distributor.open_channel(Id::from("B"), String::new(), newest);

        distributor.publish(&"x".to_string());
        distributor.close(&Id::from("A"));
        distributor.publish(&"y".to_string());
        distributor.close(&Id::from("B"));

        assert_eq!(a.collect::<Vec<_>>().await, vec!["x"]);
        assert_eq!(b.collect::<Vec<_>>().await, vec!["y"]);
    }
}

#[tokio::test]
async fn test_close_between_publishes_with_active_readers() {
    init_test_tracing();
    let distributor: Distributor<String> = Distributor::default();
    let newest = BufferingPolicy::BufferNewest(1);
    let mut a = distributor.open_channel(Id::from("A"), String::new(), newest);
    let mut b = distributor.open_channel(Id::from("B"), String::new(), newest);
    assert_eq!(a.recv().await.as_deref(), Some(""));
    assert_eq!(b.recv().await.as_deref(), Some(""));

    distributor.publish(&"x".to_string());
    let a_seen: Vec<String> = std::iter::from_fn(|| a.try_recv()).collect();
    let mut b_seen: Vec<String> = std::iter::from_fn(|| b.try_recv()).collect();
    distributor.close(&Id::from("A"));
    distributor.publish(&"y".to_string());
    distributor.close(&Id::from("B"));
    b_seen.extend(b.collect::<Vec<_>>().await);

    assert_eq!(a_seen, vec!["x"]);
    assert_eq!(a.recv().await, None);
    assert_eq!(b_seen, vec!["x", "y"]);
}

#[tokio::test(start_paused = true)]
async fn test_every_stream_sees_every_snapshot() {
    init_test_tracing();
    let store = test_store();
    let first = store.stream("first", |s: &TestState| s.ints.len(), None);
    let second = store.stream("second", |s: &TestState| s.ints.len(), None);

    for value in 0..5 {
        store.receive(append(value));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.deactivate();

    let expected: Vec<usize> = (0..=5).collect();
    assert_eq!(first.collect::<Vec<_>>().await, expected);
    assert_eq!(second.collect::<Vec<_>>().await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_newest_stream_skips_to_latest() {
    init_test_tracing();
    let store = test_store();
    let latest = store.stream(
        "latest",
        |s: &TestState| s.ints.len(),
        Some(BufferingPolicy::BufferNewest(1)),
    );

    for value in 0..5 {
        store.receive(append(value));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.deactivate();

    assert_eq!(latest.collect::<Vec<_>>().await, vec![5]);
}

#[tokio::test(start_paused = true)]
async fn test_selector_duplicates_are_removed() {
    init_test_tracing();
    let store = test_store();
    let completed = store.stream("completed", |s: &TestState| s.is_completed, None);

    store.receive(append(1));
    store.receive(append(2));
    store.receive(Effect::set(|s: &mut TestState| s.is_completed = true));
    store.receive(append(3));
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.deactivate();

    assert_eq!(completed.collect::<Vec<_>>().await, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_stream_is_pruned_on_publish() {
    init_test_tracing();
    let (store, sink) = test_store_with_sink(DiagnosticLevel::Info);
    let stream = store.stream("short-lived", |s: &TestState| s.ints.len(), None);
    drop(stream);

    store.receive(append(1));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        sink.count(|d| matches!(d, Diagnostic::ChannelTerminated { .. })),
        1
    );
}
