//! Field merge: fold one event into a transaction, then recompute everything
//! derived from it (occupancy, status, validity).

use prk_schemas::{CanonicalTransaction, FeedEvent, UseType, ValidationError};

use crate::bucketizer::{bucket_count, bucketize, BucketGranularity};
use crate::classifier::{apply_classification, RuleTable};

/// Copy the event's facts onto `tx`. Identity, versioning and derived
/// fields are left alone.
pub fn merge_event(tx: &mut CanonicalTransaction, event: &FeedEvent) {
    match event {
        FeedEvent::Exit(e) => {
            tx.checkin_at = Some(e.checkin_at);
            tx.checkout_at = Some(e.checkout_at);
            tx.use_type = e.use_type.clone();
            if e.fare_name.is_some() {
                tx.fare_name = e.fare_name.clone();
            }
            if let Some(s) = &e.settlement {
                tx.fare_amount_micros = s.paid_micros;
                tx.paid_amount_micros = s.paid_micros;
                tx.payment_method = s.method;
            }
        }
        FeedEvent::Payment(p) => {
            tx.payment_at = Some(p.paid_at);
            tx.fare_amount_micros = p.amount_micros;
            tx.paid_amount_micros = p.amount_micros;
            tx.discount_micros = p.discount_micros;
            tx.payment_method = p.method;
            // a payment without a use code must not erase the exit scan's
            if p.use_type != UseType::Outro || tx.use_type == UseType::Outro {
                tx.use_type = p.use_type.clone();
            }
        }
        FeedEvent::Credential(c) => {
            tx.category = Some(c.category.clone());
        }
    }
}

/// Recompute occupancy and classification.
///
/// Occupancy is only derived once both ends of the visit are known; a span
/// longer than `max_buckets` is rejected before any bucket is allocated.
pub fn rederive(
    tx: &mut CanonicalTransaction,
    granularity: BucketGranularity,
    table: &RuleTable,
    max_buckets: usize,
) -> Result<(), ValidationError> {
    match tx.visit_window() {
        Some((ci, co)) => {
            let n = bucket_count(ci, co, granularity);
            if n > max_buckets {
                return Err(ValidationError::single(format!(
                    "visit {ci} -> {co} spans {n} buckets, limit is {max_buckets}"
                )));
            }
            let occ = bucketize(ci, co, granularity);
            tx.occupied_buckets = occ.buckets;
            tx.duration_units = occ.duration_units;
        }
        None => {
            tx.occupied_buckets.clear();
            tx.duration_units = 0.0;
        }
    }
    apply_classification(tx, table);
    Ok(())
}
