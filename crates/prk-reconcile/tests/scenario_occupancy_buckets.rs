use chrono::{DateTime, Duration, TimeZone, Utc};
use prk_reconcile::*;

fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 10, 1, h, m, s).unwrap()
}

#[test]
fn scenario_worked_example_partial_hours() {
    let occ = bucketize(ts(8, 45, 46), ts(12, 16, 24), BucketGranularity::Hour);
    assert_eq!(
        occ.buckets,
        vec![ts(9, 0, 0), ts(10, 0, 0), ts(11, 0, 0), ts(12, 0, 0)]
    );
    assert_eq!(occ.duration_units, 4.0);
}

#[test]
fn scenario_inverted_window_is_empty() {
    let occ = bucketize(ts(12, 0, 0), ts(8, 0, 0), BucketGranularity::Hour);
    assert!(occ.buckets.is_empty());
    assert_eq!(occ.duration_units, 0.0);

    // same hour, never reaching a boundary
    let occ = bucketize(ts(8, 10, 0), ts(8, 50, 0), BucketGranularity::Hour);
    assert!(occ.buckets.is_empty());
}

#[test]
fn scenario_aligned_endpoints_give_n_plus_one_buckets() {
    for g in [BucketGranularity::Hour, BucketGranularity::HalfHour] {
        for n in 0..6i64 {
            let start = ts(6, 0, 0);
            let end = start + Duration::seconds(g.step_seconds() * n);
            let occ = bucketize(start, end, g);
            assert_eq!(occ.buckets.len(), (n + 1) as usize, "{} n={n}", g.as_str());
            assert_eq!(bucket_count(start, end, g), occ.buckets.len());
            assert!(occ.buckets.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

#[test]
fn scenario_half_hour_units_are_halves() {
    let occ = bucketize(ts(8, 15, 0), ts(10, 40, 0), BucketGranularity::HalfHour);
    assert_eq!(
        occ.buckets,
        vec![ts(8, 30, 0), ts(9, 0, 0), ts(9, 30, 0), ts(10, 0, 0), ts(10, 30, 0)]
    );
    assert_eq!(occ.duration_units, 2.5);
}
