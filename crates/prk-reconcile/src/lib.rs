//! prk-reconcile
//!
//! Transaction Reconciliation Engine core:
//! - occupancy buckets from a visit window
//! - ordered status rule table
//! - same-visit / new-visit decision for a matched record
//! - field merge and the pure per-event step
//! - the store contract the orchestrator matches and persists through
//!
//! Deterministic, pure logic apart from the store trait. No clock.

pub mod bucketizer;
pub mod classifier;
pub mod decider;
pub mod merge;
mod step;
mod store;

pub use bucketizer::{bucket_count, bucketize, BucketGranularity, Occupancy};
pub use classifier::{
    classify, is_valid_for, Classification, ClassifyFacts, MethodMatch, RuleTable,
    RuleTableVersion, StatusRule,
};
pub use decider::{decide, pick_match, ReplacePolicy, Revision};
pub use merge::{merge_event, rederive};
pub use step::{fresh_record, plan_step, EngineRules, Persist, Step, DEFAULT_MAX_OCCUPANCY_BUCKETS};
pub use store::{StoreError, TransactionStore};
