//! Occupancy Bucketizer.
//!
//! A visit occupies every granularity boundary `t` with
//! `ceil(checkin) <= t <= floor(checkout)`. A checkin exactly on a boundary
//! counts that boundary; any non-zero minute, second or sub-second pushes it
//! to the next one.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketGranularity {
    #[default]
    Hour,
    HalfHour,
}

impl BucketGranularity {
    pub fn step_seconds(&self) -> i64 {
        match self {
            BucketGranularity::Hour => 3_600,
            BucketGranularity::HalfHour => 1_800,
        }
    }

    /// Duration contributed by one bucket, in hours.
    pub fn units_per_bucket(&self) -> f64 {
        match self {
            BucketGranularity::Hour => 1.0,
            BucketGranularity::HalfHour => 0.5,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "1h" => Some(BucketGranularity::Hour),
            "half_hour" | "30m" => Some(BucketGranularity::HalfHour),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketGranularity::Hour => "hour",
            BucketGranularity::HalfHour => "half_hour",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Occupancy {
    pub buckets: Vec<DateTime<Utc>>,
    pub duration_units: f64,
}

fn offset_into_bucket(t: DateTime<Utc>, g: BucketGranularity) -> Duration {
    let secs = t.timestamp().rem_euclid(g.step_seconds());
    Duration::seconds(secs) + Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

pub fn is_aligned(t: DateTime<Utc>, g: BucketGranularity) -> bool {
    offset_into_bucket(t, g) == Duration::zero()
}

/// Latest boundary at or before `t`.
pub fn floor_to(t: DateTime<Utc>, g: BucketGranularity) -> DateTime<Utc> {
    // the earliest representable instant is a midnight, so this never underflows
    t - offset_into_bucket(t, g)
}

/// Earliest boundary at or after `t`; `None` past the last representable one.
pub fn ceil_to(t: DateTime<Utc>, g: BucketGranularity) -> Option<DateTime<Utc>> {
    if is_aligned(t, g) {
        Some(t)
    } else {
        floor_to(t, g).checked_add_signed(Duration::seconds(g.step_seconds()))
    }
}

/// Number of buckets [`bucketize`] would emit, without allocating.
pub fn bucket_count(checkin: DateTime<Utc>, checkout: DateTime<Utc>, g: BucketGranularity) -> usize {
    let Some(start) = ceil_to(checkin, g) else {
        return 0;
    };
    let end = floor_to(checkout, g);
    if start > end {
        return 0;
    }
    let steps = (end - start).num_seconds() / g.step_seconds();
    usize::try_from(steps).map(|n| n + 1).unwrap_or(0)
}

pub fn bucketize(checkin: DateTime<Utc>, checkout: DateTime<Utc>, g: BucketGranularity) -> Occupancy {
    let end = floor_to(checkout, g);
    let step = Duration::seconds(g.step_seconds());

    let mut buckets = Vec::with_capacity(bucket_count(checkin, checkout, g));
    let mut next = ceil_to(checkin, g);
    while let Some(t) = next.filter(|t| *t <= end) {
        buckets.push(t);
        next = t.checked_add_signed(step);
    }

    let duration_units = buckets.len() as f64 * g.units_per_bucket();
    Occupancy {
        buckets,
        duration_units,
    }
}
