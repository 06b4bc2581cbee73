//! prk-runtime
//!
//! Reconciliation Orchestrator: drives normalized feed events through the
//! pure core in prk-reconcile against a [`prk_reconcile::TransactionStore`],
//! sequentially or across key-sharded tokio workers.
//!
//! Runtime owns:
//! - store call timeouts (elapsed = store unavailable, fatal)
//! - conflict re-runs
//! - per-batch counters

mod engine;
mod settings;
mod shard;

pub use engine::{Applied, BatchReport, ReconcileError, Reconciler};
pub use settings::{
    RuntimeSettings, DEFAULT_CONFLICT_RETRIES, DEFAULT_QUEUE_DEPTH, DEFAULT_STORE_TIMEOUT_MS,
    DEFAULT_WORKERS,
};
pub use shard::shard_of;
