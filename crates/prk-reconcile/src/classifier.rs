//! Status Classifier.
//!
//! An ordered rule table over four facts about a transaction: unknown
//! sequence, unknown matricula, zero fare, payment method. The first matching
//! rule decides the status; no match is INVALID. Validity is derived from
//! the status and the payment method.

use prk_schemas::{CanonicalTransaction, PaymentMethod, TxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMatch {
    Any,
    Is(PaymentMethod),
    IsNot(PaymentMethod),
}

impl MethodMatch {
    fn matches(&self, m: PaymentMethod) -> bool {
        match self {
            MethodMatch::Any => true,
            MethodMatch::Is(want) => m == *want,
            MethodMatch::IsNot(unwanted) => m != *unwanted,
        }
    }
}

/// One row of the table. `None` is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRule {
    pub sequence_zero: Option<bool>,
    pub matricula_zero: Option<bool>,
    pub fare_zero: Option<bool>,
    pub method: MethodMatch,
    pub status: TxStatus,
}

impl StatusRule {
    const fn new(
        sequence_zero: Option<bool>,
        matricula_zero: Option<bool>,
        fare_zero: Option<bool>,
        method: MethodMatch,
        status: TxStatus,
    ) -> Self {
        Self {
            sequence_zero,
            matricula_zero,
            fare_zero,
            method,
            status,
        }
    }

    pub fn matches(&self, facts: &ClassifyFacts) -> bool {
        fn flag(want: Option<bool>, have: bool) -> bool {
            want.map_or(true, |w| w == have)
        }
        flag(self.sequence_zero, facts.sequence_zero)
            && flag(self.matricula_zero, facts.matricula_zero)
            && flag(self.fare_zero, facts.fare_zero)
            && self.method.matches(facts.method)
    }
}

/// The inputs the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyFacts {
    pub sequence_zero: bool,
    pub matricula_zero: bool,
    pub fare_zero: bool,
    pub method: PaymentMethod,
}

impl ClassifyFacts {
    pub fn of(tx: &CanonicalTransaction) -> Self {
        Self {
            sequence_zero: tx.sequence_is_unknown(),
            matricula_zero: tx.matricula_is_unknown(),
            fare_zero: tx.fare_amount_micros == 0,
            method: tx.payment_method,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleTableVersion {
    /// Legacy: every record is VALID.
    V1,
    #[default]
    V2,
}

impl RuleTableVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" => Some(RuleTableVersion::V1),
            "v2" => Some(RuleTableVersion::V2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTableVersion::V1 => "v1",
            RuleTableVersion::V2 => "v2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    pub version: RuleTableVersion,
    pub rules: Vec<StatusRule>,
}

impl RuleTable {
    pub fn for_version(version: RuleTableVersion) -> Self {
        use MethodMatch::{Any, Is, IsNot};
        use TxStatus::{Deviation, Valid};
        const T: Option<bool> = Some(true);
        const F: Option<bool> = Some(false);

        let rules = match version {
            RuleTableVersion::V1 => vec![StatusRule::new(None, None, None, Any, Valid)],
            RuleTableVersion::V2 => vec![
                StatusRule::new(T, F, T, Any, Valid),
                StatusRule::new(T, F, F, Any, Deviation),
                StatusRule::new(T, T, None, Any, Deviation),
                StatusRule::new(F, F, T, Any, Valid),
                StatusRule::new(F, T, T, IsNot(PaymentMethod::Isento), Deviation),
                StatusRule::new(F, T, T, Is(PaymentMethod::Isento), Valid),
                StatusRule::new(F, T, F, Any, Valid),
            ],
        };
        Self { version, rules }
    }

    pub fn status_for(&self, facts: &ClassifyFacts) -> TxStatus {
        self.rules
            .iter()
            .find(|r| r.matches(facts))
            .map(|r| r.status)
            .unwrap_or(TxStatus::Invalid)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::for_version(RuleTableVersion::default())
    }
}

/// False for INVALID, DEVIATION, and anything paid with a cancelled method.
pub fn is_valid_for(status: TxStatus, method: PaymentMethod) -> bool {
    !(matches!(status, TxStatus::Invalid | TxStatus::Deviation) || method == PaymentMethod::Cancelado)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: TxStatus,
    pub is_valid: bool,
}

pub fn classify(tx: &CanonicalTransaction, table: &RuleTable) -> Classification {
    let facts = ClassifyFacts::of(tx);
    let status = table.status_for(&facts);
    Classification {
        status,
        is_valid: is_valid_for(status, facts.method),
    }
}

/// Recompute and store the derived status fields.
pub fn apply_classification(tx: &mut CanonicalTransaction, table: &RuleTable) {
    let c = classify(tx, table);
    tx.status = c.status;
    tx.is_valid = c.is_valid;
}
