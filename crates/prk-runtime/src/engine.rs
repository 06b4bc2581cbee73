//! Reconciliation Orchestrator.
//!
//! Per event: normalize, match against the store, decide, merge, derive,
//! validate, persist. Record-level failures are counted and skipped; a store
//! that is down or too slow aborts the batch.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use prk_feed::{normalize, DecodedFeed, FeedKind, NormalizeError, RawRecord};
use prk_reconcile::{pick_match, plan_step, Persist, Revision, StoreError, TransactionStore};
use prk_schemas::{
    CanonicalTransaction, FeedEvent, Parking, ValidationError, VisitKey, UNKNOWN_ID,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settings::RuntimeSettings;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// The matched record moved (or vanished) between match and write.
    Conflict { key: VisitKey, id: Uuid },
    /// Transport failure or timeout. Fatal for the batch.
    StoreUnavailable(String),
    ValidationFailure {
        key: VisitKey,
        error: ValidationError,
    },
    /// A shard task panicked or was cancelled. Fatal for the batch.
    WorkerFailed(String),
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::StoreUnavailable(_) | ReconcileError::WorkerFailed(_)
        )
    }

    fn from_store(key: &VisitKey, e: StoreError) -> Self {
        match e {
            StoreError::Conflict { id, .. } | StoreError::NotFound { id } => ReconcileError::Conflict {
                key: key.clone(),
                id,
            },
            StoreError::Unavailable(msg) => ReconcileError::StoreUnavailable(msg),
            StoreError::Validation(error) => ReconcileError::ValidationFailure {
                key: key.clone(),
                error,
            },
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Conflict { key, id } => {
                write!(f, "conflict on {key}: record {id} changed concurrently")
            }
            ReconcileError::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            ReconcileError::ValidationFailure { key, error } => write!(f, "{key}: {error}"),
            ReconcileError::WorkerFailed(msg) => write!(f, "reconcile worker failed: {msg}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Counters for one batch. Every decoded record lands in exactly one of
/// created / updated / replaced / malformed / unknown_code /
/// validation_failures / conflicts, or (for credentials) adds to fanned_out.
/// A fan-out that conflicts part-way adds its written siblings to fanned_out
/// and also counts one conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub records: usize,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    /// Records touched by credential fan-out.
    pub fanned_out: usize,
    pub malformed: usize,
    pub unknown_code: usize,
    pub validation_failures: usize,
    pub conflicts: usize,
    /// Keys that matched more than one live record.
    pub duplicate_key: usize,
    pub decode_rejects: usize,
}

impl BatchReport {
    pub fn absorb(&mut self, other: &BatchReport) {
        self.records += other.records;
        self.created += other.created;
        self.updated += other.updated;
        self.replaced += other.replaced;
        self.fanned_out += other.fanned_out;
        self.malformed += other.malformed;
        self.unknown_code += other.unknown_code;
        self.validation_failures += other.validation_failures;
        self.conflicts += other.conflicts;
        self.duplicate_key += other.duplicate_key;
        self.decode_rejects += other.decode_rejects;
    }

    /// Records that were dropped for any reason.
    pub fn skipped(&self) -> usize {
        self.malformed + self.unknown_code + self.validation_failures + self.conflicts
    }

    fn count_applied(&mut self, applied: &Applied) {
        if applied.duplicate_key {
            self.duplicate_key += 1;
        }
        if applied.conflict.is_some() {
            self.conflicts += 1;
        }
        if applied.fanned_out > 0 || applied.conflict.is_some() {
            self.fanned_out += applied.fanned_out;
            return;
        }
        match applied.revision {
            Revision::Create => self.created += 1,
            Revision::Update => self.updated += 1,
            Revision::Replace => self.replaced += 1,
        }
    }
}

/// What one event did to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub revision: Revision,
    /// Records as the store returned them.
    pub written: Vec<CanonicalTransaction>,
    /// Number of existing records a credential was fanned out to.
    pub fanned_out: usize,
    pub duplicate_key: bool,
    /// First conflict of a fan-out that still wrote some siblings.
    pub conflict: Option<ReconcileError>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the store and settings.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) parking: Parking,
    pub(crate) settings: Arc<RuntimeSettings>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TransactionStore>, parking: Parking, settings: RuntimeSettings) -> Self {
        Self {
            store,
            parking,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn parking(&self) -> &Parking {
        &self.parking
    }

    /// Reconcile a whole decoded feed.
    pub async fn run_batch(&self, kind: FeedKind, feed: DecodedFeed) -> Result<BatchReport, ReconcileError> {
        let mut report = BatchReport {
            records: feed.records.len(),
            decode_rejects: feed.rejected.len(),
            ..BatchReport::default()
        };
        for r in &feed.rejected {
            warn!(row = r.row, reason = %r.reason, "decode reject");
        }

        if self.settings.workers > 1 {
            self.run_sharded(kind, &feed.records, &mut report).await?;
        } else {
            for raw in &feed.records {
                let Some(event) = self.normalize_counted(kind, raw, &mut report) else {
                    continue;
                };
                self.ingest_one(raw.row, &event, &mut report).await?;
            }
        }

        info!(
            parking_id = self.parking.id,
            kind = kind.as_str(),
            records = report.records,
            created = report.created,
            updated = report.updated,
            replaced = report.replaced,
            fanned_out = report.fanned_out,
            skipped = report.skipped(),
            "batch complete"
        );
        Ok(report)
    }

    /// Reconcile one event, re-running it from a fresh match on conflict up
    /// to `conflict_retries` times.
    pub async fn reconcile(&self, event: &FeedEvent) -> Result<Applied, ReconcileError> {
        let mut attempt = 0u32;
        loop {
            let res = match event {
                FeedEvent::Credential(_) => self.fan_out(event).await,
                _ => self.apply_keyed(event).await,
            };
            match res {
                Err(ReconcileError::Conflict { key, id }) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(%key, %id, attempt, "conflict, re-running event");
                }
                Ok(Applied {
                    conflict: Some(e), ..
                }) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(error = %e, attempt, "fan-out conflict, re-running event");
                }
                other => return other,
            }
        }
    }

    /// Normalize, counting (and logging) the record on failure.
    pub(crate) fn normalize_counted(
        &self,
        kind: FeedKind,
        raw: &RawRecord,
        report: &mut BatchReport,
    ) -> Option<FeedEvent> {
        match normalize(kind, raw, self.settings.code_policy) {
            Ok(event) => Some(event),
            Err(e) => {
                match &e {
                    NormalizeError::MalformedRecord { .. } => report.malformed += 1,
                    NormalizeError::UnknownCode { .. } => report.unknown_code += 1,
                }
                warn!(
                    row = e.row(),
                    field = e.field(),
                    raw = e.raw(),
                    error = %e,
                    "record skipped"
                );
                None
            }
        }
    }

    /// Apply one normalized event and count the outcome. Only fatal errors
    /// are returned.
    pub(crate) async fn ingest_one(
        &self,
        row: usize,
        event: &FeedEvent,
        report: &mut BatchReport,
    ) -> Result<(), ReconcileError> {
        match self.reconcile(event).await {
            Ok(applied) => {
                for tx in &applied.written {
                    debug!(
                        row,
                        kind = event.kind_str(),
                        revision = applied.revision.as_str(),
                        sequence = %tx.sequence,
                        matricula = %tx.matricula,
                        id = ?tx.id,
                        version = tx.version,
                        status = tx.status.as_str(),
                        "applied"
                    );
                }
                if let Some(e) = &applied.conflict {
                    warn!(row, error = %e, written = applied.written.len(), "fan-out partly applied");
                }
                report.count_applied(&applied);
                Ok(())
            }
            Err(e @ ReconcileError::Conflict { .. }) => {
                report.conflicts += 1;
                warn!(row, error = %e, "unresolved conflict, record skipped");
                Ok(())
            }
            Err(e @ ReconcileError::ValidationFailure { .. }) => {
                report.validation_failures += 1;
                warn!(row, error = %e, "validation failure, record skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_keyed(&self, event: &FeedEvent) -> Result<Applied, ReconcileError> {
        let key = VisitKey::new(
            self.parking.id,
            event.sequence().unwrap_or(UNKNOWN_ID),
            event.matricula(),
        );
        let matches = self
            .call("find_by_key", self.store.find_by_key(&key))
            .await
            .map_err(|e| ReconcileError::from_store(&key, e))?;

        let duplicate_key = matches.len() > 1;
        if duplicate_key {
            warn!(%key, matches = matches.len(), "duplicate_key: same visit first, else newest");
        }

        let current = pick_match(&matches, event);
        let step = plan_step(&self.settings.rules, &self.parking, current, event).map_err(
            |error| ReconcileError::ValidationFailure {
                key: key.clone(),
                error,
            },
        )?;
        let written = self.persist(&key, step.persist).await?;

        Ok(Applied {
            revision: step.revision,
            written: vec![written],
            fanned_out: 0,
            duplicate_key,
            conflict: None,
        })
    }

    /// Credentials update every live record of the person in the lot, or
    /// create a credential-only record when there is none.
    async fn fan_out(&self, event: &FeedEvent) -> Result<Applied, ReconcileError> {
        let person = VisitKey::new(self.parking.id, UNKNOWN_ID, event.matricula());
        let matches = self
            .call(
                "find_all_by_matricula",
                self.store
                    .find_all_by_matricula(self.parking.id, event.matricula()),
            )
            .await
            .map_err(|e| ReconcileError::from_store(&person, e))?;

        if matches.is_empty() {
            let step = plan_step(&self.settings.rules, &self.parking, None, event).map_err(|error| {
                ReconcileError::ValidationFailure {
                    key: person.clone(),
                    error,
                }
            })?;
            let written = self.persist(&person, step.persist).await?;
            return Ok(Applied {
                revision: step.revision,
                written: vec![written],
                fanned_out: 0,
                duplicate_key: false,
                conflict: None,
            });
        }

        let mut written = Vec::with_capacity(matches.len());
        let mut conflict = None;
        for current in &matches {
            let key = current.key();
            let step = plan_step(&self.settings.rules, &self.parking, Some(current), event).map_err(
                |error| ReconcileError::ValidationFailure {
                    key: key.clone(),
                    error,
                },
            )?;
            match self.persist(&key, step.persist).await {
                Ok(tx) => written.push(tx),
                Err(e @ ReconcileError::Conflict { .. }) => {
                    warn!(error = %e, "fan-out conflict");
                    conflict.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if written.is_empty() {
            if let Some(e) = conflict {
                return Err(e);
            }
        }

        Ok(Applied {
            revision: Revision::Update,
            fanned_out: written.len(),
            written,
            duplicate_key: false,
            conflict,
        })
    }

    async fn persist(&self, key: &VisitKey, persist: Persist) -> Result<CanonicalTransaction, ReconcileError> {
        let res = match persist {
            Persist::Insert(tx) => self.call("insert", self.store.insert(tx)).await,
            Persist::Update {
                tx,
                expected_version,
            } => {
                self.call(
                    "update_versioned",
                    self.store.update_versioned(tx, expected_version),
                )
                .await
            }
        };
        res.map_err(|e| ReconcileError::from_store(key, e))
    }

    /// Bound a store call by `store_timeout`; elapsing counts as unavailable.
    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {}ms",
                self.settings.store_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let key = VisitKey::new(1, "123", "0");
        let id = Uuid::new_v4();

        let e = ReconcileError::from_store(
            &key,
            StoreError::Conflict {
                id,
                expected_version: 2,
            },
        );
        assert_eq!(e, ReconcileError::Conflict { key: key.clone(), id });
        assert!(!e.is_fatal());

        let e = ReconcileError::from_store(&key, StoreError::NotFound { id });
        assert!(matches!(e, ReconcileError::Conflict { .. }));

        let e = ReconcileError::from_store(&key, StoreError::Unavailable("reset".into()));
        assert!(e.is_fatal());

        let e = ReconcileError::from_store(
            &key,
            StoreError::Validation(ValidationError::single("bad")),
        );
        assert!(matches!(e, ReconcileError::ValidationFailure { .. }));
        assert!(!e.is_fatal());
    }

    #[test]
    fn report_counts_fan_out_separately() {
        let tx = CanonicalTransaction::new_visit(Parking::new(1, "Monza", "monza"), "1", "982", "On-demand");
        let mut r = BatchReport::default();
        r.count_applied(&Applied {
            revision: Revision::Update,
            written: vec![tx.clone(), tx.clone()],
            fanned_out: 2,
            duplicate_key: false,
            conflict: None,
        });
        r.count_applied(&Applied {
            revision: Revision::Replace,
            written: vec![tx],
            fanned_out: 0,
            duplicate_key: true,
            conflict: None,
        });
        assert_eq!(r.fanned_out, 2);
        assert_eq!(r.updated, 0);
        assert_eq!(r.replaced, 1);
        assert_eq!(r.duplicate_key, 1);
    }

    #[test]
    fn partial_fan_out_counts_written_siblings_and_the_conflict() {
        let tx = CanonicalTransaction::new_visit(Parking::new(1, "Monza", "monza"), "1", "982", "On-demand");
        let key = tx.key();
        let mut r = BatchReport::default();
        r.count_applied(&Applied {
            revision: Revision::Update,
            written: vec![tx.clone(), tx],
            fanned_out: 2,
            duplicate_key: false,
            conflict: Some(ReconcileError::Conflict {
                key,
                id: Uuid::new_v4(),
            }),
        });
        assert_eq!(r.fanned_out, 2);
        assert_eq!(r.conflicts, 1);
        assert_eq!(r.updated, 0);
    }

    #[test]
    fn absorb_sums_every_counter() {
        let a = BatchReport {
            records: 3,
            created: 1,
            conflicts: 1,
            malformed: 1,
            ..BatchReport::default()
        };
        let mut total = a.clone();
        total.absorb(&a);
        assert_eq!(total.records, 6);
        assert_eq!(total.skipped(), 4);
    }
}
