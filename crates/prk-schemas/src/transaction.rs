use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Parking, PaymentMethod, TxStatus, UseType, VisitKey, SCHEMA_VERSION, UNKNOWN_ID};

/// The reconciled record of one parking visit.
///
/// `status` and `is_valid` are derived: only the classifier in
/// `prk-reconcile` writes them. `id`, `version`, `created_at` and
/// `updated_at` are owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    /// Store-assigned identity. `None` until the first insert.
    pub id: Option<Uuid>,
    pub parking: Parking,
    /// Ticket number; `"0"` when unknown.
    pub sequence: String,
    /// Subscriber registration; `"0"` when unknown.
    pub matricula: String,

    pub checkin_at: Option<DateTime<Utc>>,
    pub checkout_at: Option<DateTime<Utc>>,
    pub payment_at: Option<DateTime<Utc>>,
    /// Granularity-aligned instants the visit occupies, chronological.
    pub occupied_buckets: Vec<DateTime<Utc>>,
    /// Bucket count scaled by the bucket length in hours (0.5 per half hour).
    pub duration_units: f64,

    pub fare_amount_micros: i64,
    pub paid_amount_micros: i64,
    pub discount_micros: i64,
    /// Tariff table name, when the source carries one.
    pub fare_name: Option<String>,

    pub use_type: UseType,
    pub offer_type: String,
    pub category: Option<String>,
    pub payment_method: PaymentMethod,

    pub status: TxStatus,
    pub is_valid: bool,

    pub version: i64,
    pub schema: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CanonicalTransaction {
    /// Fresh, unpersisted record for a visit key. Derived fields start at
    /// their "nothing known" values and are recomputed on the first merge.
    pub fn new_visit(
        parking: Parking,
        sequence: impl Into<String>,
        matricula: impl Into<String>,
        offer_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            parking,
            sequence: sequence.into(),
            matricula: matricula.into(),
            checkin_at: None,
            checkout_at: None,
            payment_at: None,
            occupied_buckets: Vec::new(),
            duration_units: 0.0,
            fare_amount_micros: 0,
            paid_amount_micros: 0,
            discount_micros: 0,
            fare_name: None,
            use_type: UseType::Outro,
            offer_type: offer_type.into(),
            category: None,
            payment_method: PaymentMethod::NotInformed,
            status: TxStatus::Invalid,
            is_valid: false,
            version: 0,
            schema: SCHEMA_VERSION,
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }

    pub fn key(&self) -> VisitKey {
        VisitKey::new(self.parking.id, self.sequence.clone(), self.matricula.clone())
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn sequence_is_unknown(&self) -> bool {
        self.sequence == UNKNOWN_ID
    }

    pub fn matricula_is_unknown(&self) -> bool {
        self.matricula == UNKNOWN_ID
    }

    /// Both ends of the visit are known, so occupancy can be derived.
    pub fn visit_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.checkin_at, self.checkout_at) {
            (Some(ci), Some(co)) => Some((ci, co)),
            _ => None,
        }
    }

    /// Granularity-independent invariants. Stores run this on every write.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::from_problems(self.problems())
    }

    /// [`validate`](Self::validate) plus the occupancy invariants for a grid
    /// of `bucket_seconds`: every bucket sits on a boundary and
    /// `duration_units` is the bucket count in hours.
    pub fn validate_on_grid(&self, bucket_seconds: i64) -> Result<(), ValidationError> {
        let mut problems = self.problems();
        if bucket_seconds <= 0 {
            problems.push(format!("bucket length must be positive ({bucket_seconds}s)"));
            return ValidationError::from_problems(problems);
        }

        if let Some(off) = self
            .occupied_buckets
            .iter()
            .find(|b| b.timestamp().rem_euclid(bucket_seconds) != 0 || b.timestamp_subsec_nanos() != 0)
        {
            problems.push(format!("occupied bucket {off} is not on the {bucket_seconds}s grid"));
        }

        let expected = self.occupied_buckets.len() as f64 * bucket_seconds as f64 / 3_600.0;
        if (self.duration_units - expected).abs() > 1e-9 {
            problems.push(format!(
                "duration_units {} does not match {} bucket(s) ({expected})",
                self.duration_units,
                self.occupied_buckets.len()
            ));
        }

        ValidationError::from_problems(problems)
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.sequence.trim().is_empty() {
            problems.push("sequence is empty (use \"0\" for unknown)".to_string());
        }
        if self.matricula.trim().is_empty() {
            problems.push("matricula is empty (use \"0\" for unknown)".to_string());
        }
        for (name, v) in [
            ("fare_amount_micros", self.fare_amount_micros),
            ("paid_amount_micros", self.paid_amount_micros),
            ("discount_micros", self.discount_micros),
        ] {
            if v < 0 {
                problems.push(format!("{name} is negative ({v})"));
            }
        }
        if self.duration_units < 0.0 || !self.duration_units.is_finite() {
            problems.push(format!("duration_units is invalid ({})", self.duration_units));
        }
        if self
            .occupied_buckets
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            problems.push("occupied_buckets are not strictly increasing".to_string());
        }
        if self.version < 0 {
            problems.push(format!("version is negative ({})", self.version));
        }
        if self.is_deleted() {
            problems.push("transaction is soft-deleted".to_string());
        }
        problems
    }
}

/// One or more invariant violations found on a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }

    fn from_problems(problems: Vec<String>) -> Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self { problems })
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction validation failed: {}", self.problems.join("; "))
    }
}

impl std::error::Error for ValidationError {}
