//! prk-schemas
//!
//! Shared data model for the parking reconciliation workspace: the canonical
//! per-visit transaction, the parking lot identity, business keys, the
//! canonical code enumerations, and the transient feed events that drive a
//! reconciliation step.
//!
//! No IO, no clock. Every other crate depends on this one.

mod events;
mod transaction;

pub use events::{CredentialEvent, ExitEvent, FeedEvent, PaymentEvent, Settlement};
pub use transaction::{CanonicalTransaction, ValidationError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used for an unknown ticket sequence or matricula.
pub const UNKNOWN_ID: &str = "0";

/// Offer type stamped on every transaction produced by this pipeline.
pub const OFFER_TYPE_ON_DEMAND: &str = "On-demand";

/// Current persisted document schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Micros scale (1e-6) for monetary amounts.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Parking lot identity supplied by the batch caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parking {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

impl Parking {
    pub fn new(id: i64, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            slug: slug.into(),
        }
    }
}

/// Composite business key of a visit: `(parking, sequence, matricula)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisitKey {
    pub parking_id: i64,
    pub sequence: String,
    pub matricula: String,
}

impl VisitKey {
    pub fn new(parking_id: i64, sequence: impl Into<String>, matricula: impl Into<String>) -> Self {
        Self {
            parking_id,
            sequence: sequence.into(),
            matricula: matricula.into(),
        }
    }
}

impl fmt::Display for VisitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(parking={}, sequence={}, matricula={})",
            self.parking_id, self.sequence, self.matricula
        )
    }
}

// ---------------------------------------------------------------------------
// Payment method
// ---------------------------------------------------------------------------

/// Canonical payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentMethod {
    Creditcard,
    Debitcard,
    Dinheiro,
    Cancelado,
    Isento,
    Cheque,
    ConectCar,
    SemParar,
    Veloe,
    #[serde(rename = "Transferência")]
    Transferencia,
    #[serde(rename = "N/I")]
    NotInformed,
    Outro,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 12] = [
        PaymentMethod::Creditcard,
        PaymentMethod::Debitcard,
        PaymentMethod::Dinheiro,
        PaymentMethod::Cancelado,
        PaymentMethod::Isento,
        PaymentMethod::Cheque,
        PaymentMethod::ConectCar,
        PaymentMethod::SemParar,
        PaymentMethod::Veloe,
        PaymentMethod::Transferencia,
        PaymentMethod::NotInformed,
        PaymentMethod::Outro,
    ];

    /// Canonical label, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Creditcard => "Creditcard",
            PaymentMethod::Debitcard => "Debitcard",
            PaymentMethod::Dinheiro => "Dinheiro",
            PaymentMethod::Cancelado => "Cancelado",
            PaymentMethod::Isento => "Isento",
            PaymentMethod::Cheque => "Cheque",
            PaymentMethod::ConectCar => "ConectCar",
            PaymentMethod::SemParar => "SemParar",
            PaymentMethod::Veloe => "Veloe",
            PaymentMethod::Transferencia => "Transferência",
            PaymentMethod::NotInformed => "N/I",
            PaymentMethod::Outro => "Outro",
        }
    }

    /// Inverse of [`PaymentMethod::as_str`]. Exact match only.
    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Use type
// ---------------------------------------------------------------------------

/// How the visitor uses the lot. Credential feeds may carry a free-text
/// category, which is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum UseType {
    Mensalista,
    Avulso,
    #[default]
    Outro,
    Category(String),
}

impl UseType {
    pub fn as_str(&self) -> &str {
        match self {
            UseType::Mensalista => "Mensalista",
            UseType::Avulso => "Avulso",
            UseType::Outro => "Outro",
            UseType::Category(c) => c.as_str(),
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s {
            "Mensalista" => UseType::Mensalista,
            "Avulso" => UseType::Avulso,
            "Outro" | "" => UseType::Outro,
            other => UseType::Category(other.to_string()),
        }
    }
}

impl From<UseType> for String {
    fn from(u: UseType) -> Self {
        u.as_str().to_string()
    }
}

impl From<String> for UseType {
    fn from(s: String) -> Self {
        UseType::from_label(&s)
    }
}

impl fmt::Display for UseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Valid,
    Deviation,
    Invalid,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Valid => "VALID",
            TxStatus::Deviation => "DEVIATION",
            TxStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALID" => Some(TxStatus::Valid),
            "DEVIATION" => Some(TxStatus::Deviation),
            "INVALID" => Some(TxStatus::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
