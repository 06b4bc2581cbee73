//! Typed feed events produced by the normalizer.
//!
//! Events are single-use inputs: they are never persisted on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PaymentMethod, UseType};

/// Amount and method settled at the exit gate (combined transit feeds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub paid_micros: i64,
    pub method: PaymentMethod,
}

/// An exit scan: the visit window for a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub sequence: String,
    pub matricula: String,
    pub checkin_at: DateTime<Utc>,
    pub checkout_at: DateTime<Utc>,
    pub use_type: UseType,
    pub fare_name: Option<String>,
    pub settlement: Option<Settlement>,
}

/// A payment settlement for a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub sequence: String,
    pub matricula: String,
    pub paid_at: DateTime<Utc>,
    pub amount_micros: i64,
    pub discount_micros: i64,
    pub method: PaymentMethod,
    pub use_type: UseType,
}

/// A credential / category update for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEvent {
    pub matricula: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Exit(ExitEvent),
    Payment(PaymentEvent),
    Credential(CredentialEvent),
}

impl FeedEvent {
    pub fn matricula(&self) -> &str {
        match self {
            FeedEvent::Exit(e) => &e.matricula,
            FeedEvent::Payment(p) => &p.matricula,
            FeedEvent::Credential(c) => &c.matricula,
        }
    }

    /// Ticket sequence; credential events have none.
    pub fn sequence(&self) -> Option<&str> {
        match self {
            FeedEvent::Exit(e) => Some(&e.sequence),
            FeedEvent::Payment(p) => Some(&p.sequence),
            FeedEvent::Credential(_) => None,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            FeedEvent::Exit(_) => "exit",
            FeedEvent::Payment(_) => "payment",
            FeedEvent::Credential(_) => "credential",
        }
    }
}
