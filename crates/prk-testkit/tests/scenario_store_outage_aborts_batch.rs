//! Scenario: a store that fails or stalls aborts the batch instead of
//! silently skipping records.

use std::sync::Arc;
use std::time::Duration;

use prk_db::MemoryTransactionStore;
use prk_feed::FeedKind;
use prk_runtime::{ReconcileError, RuntimeSettings};
use prk_testkit::{exit_record, feed, reconciler, FaultyStore};

fn ten_exits() -> Vec<prk_feed::RawRecord> {
    (0..10)
        .map(|i| {
            exit_record(
                i + 1,
                &(200 + i).to_string(),
                "0",
                "2020-10-01 08:00:00",
                "2020-10-01 09:00:00",
            )
        })
        .collect()
}

#[tokio::test]
async fn scenario_transport_failure_is_fatal() {
    let mem = Arc::new(MemoryTransactionStore::new());
    let store = Arc::new(FaultyStore::new(mem.clone()).fail_from_call(5));
    let engine = reconciler(store.clone(), RuntimeSettings::default());

    let err = engine
        .run_batch(FeedKind::Exit, feed(ten_exits()))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::StoreUnavailable(_)), "{err}");
    assert!(err.is_fatal());

    // two exits got through (find + insert each), the fifth call failed
    assert_eq!(mem.live_count(), 2);
    assert_eq!(store.calls(), 5);
}

#[tokio::test]
async fn scenario_slow_store_times_out() {
    let mem = Arc::new(MemoryTransactionStore::new());
    let store = Arc::new(FaultyStore::new(mem.clone()).with_delay(Duration::from_millis(500)));
    let settings = RuntimeSettings {
        store_timeout: Duration::from_millis(20),
        ..RuntimeSettings::default()
    };
    let engine = reconciler(store, settings);

    let err = engine
        .run_batch(FeedKind::Exit, feed(ten_exits()))
        .await
        .unwrap_err();
    match err {
        ReconcileError::StoreUnavailable(msg) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected StoreUnavailable, got {other}"),
    }
    assert_eq!(mem.live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scenario_sharded_batch_aborts_on_outage() {
    let mem = Arc::new(MemoryTransactionStore::new());
    let store = Arc::new(FaultyStore::new(mem.clone()).fail_from_call(1));
    let settings = RuntimeSettings {
        workers: 3,
        queue_depth: 1,
        ..RuntimeSettings::default()
    };
    let engine = reconciler(store, settings);

    let err = engine
        .run_batch(FeedKind::Exit, feed(ten_exits()))
        .await
        .unwrap_err();
    assert!(err.is_fatal(), "{err}");
    assert_eq!(mem.live_count(), 0);
}
