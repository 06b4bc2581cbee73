//! Scenario: visits at the edge of the calendar reconcile or get skipped;
//! neither aborts the batch, sequential or sharded.

use std::sync::Arc;

use prk_db::MemoryTransactionStore;
use prk_feed::FeedKind;
use prk_reconcile::BucketGranularity;
use prk_runtime::RuntimeSettings;
use prk_testkit::{assert_occupancy_invariants, exit_record, feed, reconciler};

fn edge_of_calendar_exits() -> prk_feed::DecodedFeed {
    feed(vec![
        exit_record(1, "1", "0", "9999-12-31 21:15:00", "9999-12-31 23:45:00"),
        exit_record(2, "2", "0", "+262143-12-31T21:30:00Z", "+262143-12-31T23:30:00Z"),
        exit_record(3, "3", "0", "2020-10-01 08:00:00", "2020-10-01 09:30:00"),
    ])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scenario_far_future_visits_never_abort_the_batch() {
    for granularity in [BucketGranularity::Hour, BucketGranularity::HalfHour] {
        for workers in [1, 4] {
            let mut settings = RuntimeSettings::default();
            settings.rules.granularity = granularity;
            settings.workers = workers;

            let store = Arc::new(MemoryTransactionStore::new());
            let report = reconciler(store.clone(), settings)
                .run_batch(FeedKind::Exit, edge_of_calendar_exits())
                .await
                .unwrap();

            assert_eq!(report.records, 3);
            assert_eq!(report.created, 2, "{granularity:?} workers={workers}");
            assert_eq!(report.malformed, 1, "year 262143 is not a visit");
            assert_eq!(store.live_count(), 2);

            let stored = store.snapshot();
            assert_occupancy_invariants(&stored, granularity);
            let last_day = stored
                .iter()
                .find(|tx| tx.sequence == "1")
                .unwrap();
            let want = match granularity {
                BucketGranularity::Hour => 2,
                BucketGranularity::HalfHour => 5,
            };
            assert_eq!(last_day.occupied_buckets.len(), want);
        }
    }
}
