//! One reconciliation step, without IO: given the stored match (if any) and
//! an event, produce the record to persist and how to persist it.

use prk_schemas::{
    CanonicalTransaction, FeedEvent, Parking, ValidationError, OFFER_TYPE_ON_DEMAND, UNKNOWN_ID,
};

use crate::bucketizer::BucketGranularity;
use crate::classifier::{RuleTable, RuleTableVersion};
use crate::decider::{decide, ReplacePolicy, Revision};
use crate::merge::{merge_event, rederive};

/// 93 days of hourly buckets.
pub const DEFAULT_MAX_OCCUPANCY_BUCKETS: usize = 2_232;

/// Everything the pure pipeline needs to know about configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRules {
    pub granularity: BucketGranularity,
    pub rule_table: RuleTable,
    pub replace_policy: ReplacePolicy,
    pub offer_type: String,
    pub max_occupancy_buckets: usize,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            granularity: BucketGranularity::Hour,
            rule_table: RuleTable::for_version(RuleTableVersion::V2),
            replace_policy: ReplacePolicy::InsertNew,
            offer_type: OFFER_TYPE_ON_DEMAND.to_string(),
            max_occupancy_buckets: DEFAULT_MAX_OCCUPANCY_BUCKETS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Persist {
    /// New record; the store assigns id and version 1.
    Insert(CanonicalTransaction),
    /// Existing record; rejected by the store unless it is still at
    /// `expected_version`.
    Update {
        tx: CanonicalTransaction,
        expected_version: i64,
    },
}

impl Persist {
    pub fn tx(&self) -> &CanonicalTransaction {
        match self {
            Persist::Insert(tx) | Persist::Update { tx, .. } => tx,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub revision: Revision,
    pub persist: Persist,
}

/// Fresh record keyed by the event.
pub fn fresh_record(rules: &EngineRules, parking: &Parking, event: &FeedEvent) -> CanonicalTransaction {
    CanonicalTransaction::new_visit(
        parking.clone(),
        event.sequence().unwrap_or(UNKNOWN_ID),
        event.matricula(),
        rules.offer_type.clone(),
    )
}

/// Decide, merge, derive and validate.
pub fn plan_step(
    rules: &EngineRules,
    parking: &Parking,
    stored: Option<&CanonicalTransaction>,
    event: &FeedEvent,
) -> Result<Step, ValidationError> {
    let revision = decide(stored, event);

    let mut persist = match (revision, stored) {
        (Revision::Update, Some(current)) => {
            require_id(current)?;
            let mut tx = current.clone();
            merge_event(&mut tx, event);
            Persist::Update {
                expected_version: current.version,
                tx,
            }
        }
        (Revision::Replace, Some(current)) if rules.replace_policy == ReplacePolicy::Overwrite => {
            require_id(current)?;
            let mut tx = fresh_record(rules, parking, event);
            tx.id = current.id;
            tx.version = current.version;
            tx.created_at = current.created_at;
            tx.updated_at = current.updated_at;
            merge_event(&mut tx, event);
            Persist::Update {
                expected_version: current.version,
                tx,
            }
        }
        _ => {
            let mut tx = fresh_record(rules, parking, event);
            merge_event(&mut tx, event);
            Persist::Insert(tx)
        }
    };

    let tx = match &mut persist {
        Persist::Insert(tx) | Persist::Update { tx, .. } => tx,
    };
    rederive(tx, rules.granularity, &rules.rule_table, rules.max_occupancy_buckets)?;
    tx.validate_on_grid(rules.granularity.step_seconds())?;

    Ok(Step { revision, persist })
}

fn require_id(current: &CanonicalTransaction) -> Result<(), ValidationError> {
    match current.id {
        Some(_) => Ok(()),
        None => Err(ValidationError::single("stored record has no id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use prk_schemas::{ExitEvent, PaymentMethod, TxStatus, UseType};
    use uuid::Uuid;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 10, 1, h, 0, 0).unwrap()
    }

    fn parking() -> Parking {
        Parking::new(6, "Monza", "monza")
    }

    fn exit(ci: u32, co: u32) -> FeedEvent {
        FeedEvent::Exit(ExitEvent {
            sequence: "123".into(),
            matricula: "982".into(),
            checkin_at: at(ci),
            checkout_at: at(co),
            use_type: UseType::Avulso,
            fare_name: None,
            settlement: None,
        })
    }

    fn persisted(rules: &EngineRules, ci: u32, co: u32) -> CanonicalTransaction {
        let step = plan_step(rules, &parking(), None, &exit(ci, co)).unwrap();
        let mut tx = step.persist.tx().clone();
        tx.id = Some(Uuid::new_v4());
        tx.version = 3;
        tx.created_at = Some(at(0));
        tx.category = Some("Diretoria".into());
        tx
    }

    #[test]
    fn create_builds_a_classified_record() {
        let step = plan_step(&EngineRules::default(), &parking(), None, &exit(8, 10)).unwrap();
        assert_eq!(step.revision, Revision::Create);
        let Persist::Insert(tx) = &step.persist else {
            panic!("expected insert");
        };
        assert_eq!(tx.sequence, "123");
        assert_eq!(tx.matricula, "982");
        assert_eq!(tx.offer_type, "On-demand");
        assert_eq!(tx.occupied_buckets.len(), 3);
        assert_eq!(tx.status, TxStatus::Valid);
        assert!(tx.is_valid);
    }

    #[test]
    fn update_carries_expected_version() {
        let rules = EngineRules::default();
        let stored = persisted(&rules, 8, 10);
        let step = plan_step(&rules, &parking(), Some(&stored), &exit(8, 10)).unwrap();
        assert_eq!(step.revision, Revision::Update);
        let Persist::Update {
            tx,
            expected_version,
        } = &step.persist
        else {
            panic!("expected update");
        };
        assert_eq!(*expected_version, 3);
        assert_eq!(tx.id, stored.id);
        assert_eq!(tx.category.as_deref(), Some("Diretoria"));
    }

    #[test]
    fn replace_inserts_new_visit_by_default() {
        let rules = EngineRules::default();
        let stored = persisted(&rules, 8, 10);
        let step = plan_step(&rules, &parking(), Some(&stored), &exit(14, 15)).unwrap();
        assert_eq!(step.revision, Revision::Replace);
        let Persist::Insert(tx) = &step.persist else {
            panic!("expected insert");
        };
        assert!(tx.id.is_none());
        assert!(tx.category.is_none());
        assert_eq!(tx.checkin_at, Some(at(14)));
    }

    #[test]
    fn replace_overwrite_resets_in_place() {
        let rules = EngineRules {
            replace_policy: ReplacePolicy::Overwrite,
            ..EngineRules::default()
        };
        let stored = persisted(&rules, 8, 10);
        let step = plan_step(&rules, &parking(), Some(&stored), &exit(14, 15)).unwrap();
        let Persist::Update {
            tx,
            expected_version,
        } = &step.persist
        else {
            panic!("expected update");
        };
        assert_eq!(*expected_version, 3);
        assert_eq!(tx.id, stored.id);
        assert_eq!(tx.created_at, stored.created_at);
        assert!(tx.category.is_none(), "non-identity fields are reset");
        assert_eq!(tx.occupied_buckets, vec![at(14), at(15)]);
        assert_eq!(tx.payment_method, PaymentMethod::NotInformed);
    }

    #[test]
    fn planned_records_sit_on_the_configured_grid() {
        for g in [BucketGranularity::Hour, BucketGranularity::HalfHour] {
            let rules = EngineRules {
                granularity: g,
                ..EngineRules::default()
            };
            let step = plan_step(&rules, &parking(), None, &exit(8, 10)).unwrap();
            let tx = step.persist.tx();
            assert!(tx.validate_on_grid(g.step_seconds()).is_ok());
            assert_eq!(
                tx.occupied_buckets.len() as f64 * g.units_per_bucket(),
                tx.duration_units
            );
        }
    }

    #[test]
    fn oversized_visit_is_a_validation_failure() {
        let rules = EngineRules {
            max_occupancy_buckets: 1,
            ..EngineRules::default()
        };
        assert!(plan_step(&rules, &parking(), None, &exit(8, 12)).is_err());
    }

    #[test]
    fn update_of_unpersisted_record_is_rejected() {
        let rules = EngineRules::default();
        let mut stored = persisted(&rules, 8, 10);
        stored.id = None;
        let err = plan_step(&rules, &parking(), Some(&stored), &exit(8, 10)).unwrap_err();
        assert!(err.to_string().contains("no id"));
    }
}
