//! prk-testkit
//!
//! Shared scaffolding for end-to-end reconciliation scenarios: feed
//! fixtures, record builders, a fault-injecting store wrapper, and helpers
//! to compare store contents across runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use prk_feed::{decode_file, DecodedFeed, FeedFormat, FeedKind, RawRecord};
use prk_reconcile::{BucketGranularity, TransactionStore};
use prk_runtime::{Reconciler, RuntimeSettings};
use prk_schemas::{CanonicalTransaction, Parking};

mod faulty_store;

pub use faulty_store::FaultyStore;

/// The lot every fixture belongs to.
pub fn monza() -> Parking {
    Parking::new(6, "Monza", "monza")
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

/// Decode a file under `fixtures/`, format inferred from the extension.
pub fn load_fixture(name: &str, kind: FeedKind) -> Result<DecodedFeed> {
    let path = fixture_path(name);
    let format = FeedFormat::infer(&path, kind);
    decode_file(&path, kind, format).with_context(|| format!("decode fixture {}", path.display()))
}

pub fn reconciler(store: Arc<dyn TransactionStore>, settings: RuntimeSettings) -> Reconciler {
    Reconciler::new(store, monza(), settings)
}

/// Wrap in-memory records as a decoded feed.
pub fn feed(records: Vec<RawRecord>) -> DecodedFeed {
    DecodedFeed {
        records,
        rejected: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Record builders (canonical field names, timestamps as `YYYY-MM-DD HH:MM:SS`)
// ---------------------------------------------------------------------------

pub fn exit_record(row: usize, ticket: &str, matricula: &str, checkin: &str, checkout: &str) -> RawRecord {
    RawRecord::new(row)
        .with("ticket", ticket)
        .with("matricula", matricula)
        .with("checkin", checkin)
        .with("checkout", checkout)
        .with("use_type", "A")
}

pub fn payment_record(
    row: usize,
    ticket: &str,
    matricula: &str,
    paid_at: &str,
    amount: &str,
    method: &str,
) -> RawRecord {
    RawRecord::new(row)
        .with("ticket", ticket)
        .with("matricula", matricula)
        .with("paid_at", paid_at)
        .with("amount", amount)
        .with("discount", "0")
        .with("payment_method", method)
}

pub fn credential_record(row: usize, matricula: &str, category: &str) -> RawRecord {
    RawRecord::new(row)
        .with("matricula", matricula)
        .with("category", category)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Records with store-assigned identity and timestamps cleared, in a stable
/// order, so two runs over different stores can be compared.
pub fn comparable(mut txs: Vec<CanonicalTransaction>) -> Vec<CanonicalTransaction> {
    for tx in &mut txs {
        tx.id = None;
        tx.created_at = None;
        tx.updated_at = None;
        // keep "was deleted", drop when
        tx.deleted_at = tx.deleted_at.and(Utc.timestamp_opt(0, 0).single());
    }
    txs.sort_by(|a, b| {
        (&a.sequence, &a.matricula, a.checkin_at, a.payment_at, &a.category).cmp(&(
            &b.sequence,
            &b.matricula,
            b.checkin_at,
            b.payment_at,
            &b.category,
        ))
    });
    txs
}

/// Panics unless every record's buckets sit on the `g` grid and its
/// duration is the bucket count in hours.
pub fn assert_occupancy_invariants(txs: &[CanonicalTransaction], g: BucketGranularity) {
    for tx in txs {
        assert!(
            tx.validate_on_grid(g.step_seconds()).is_ok(),
            "{}/{}: {:?}",
            tx.sequence,
            tx.matricula,
            tx.validate_on_grid(g.step_seconds())
        );
        assert_eq!(
            tx.occupied_buckets.len() as f64 * g.units_per_bucket(),
            tx.duration_units,
            "{}/{}",
            tx.sequence,
            tx.matricula
        );
    }
}
