//! prk-feed
//!
//! Feed ingestion boundary: decoders turn CSV / SOAP-XML exports into
//! [`RawRecord`] field maps, and the [`normalizer`] turns those into typed
//! [`prk_schemas::FeedEvent`]s.
//!
//! This crate does **not** touch the store and holds no clock. Syntax work is
//! delegated to `csv` and `quick-xml`; this crate only maps columns / elements
//! onto canonical field names.

pub mod decode;
pub mod normalizer;

pub use decode::{decode_csv, decode_file, decode_xml, DecodeError, DecodeReject, DecodedFeed};
pub use normalizer::{normalize, CodePolicy, NormalizeError};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Canonical field names
// ---------------------------------------------------------------------------

pub const F_CHECKIN: &str = "checkin";
pub const F_CHECKOUT: &str = "checkout";
pub const F_TICKET: &str = "ticket";
pub const F_MATRICULA: &str = "matricula";
pub const F_USE_TYPE: &str = "use_type";
pub const F_PAID_AT: &str = "paid_at";
pub const F_AMOUNT: &str = "amount";
pub const F_DISCOUNT: &str = "discount";
pub const F_PAYMENT_METHOD: &str = "payment_method";
pub const F_CATEGORY: &str = "category";
pub const F_FARE_TABLE: &str = "fare_table";

// ---------------------------------------------------------------------------
// Feed kind
// ---------------------------------------------------------------------------

/// What a feed file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Exit scans (`saidas`): the visit window of a ticket.
    Exit,
    /// Payment settlements (`pagamentos`).
    Payment,
    /// Credential / category updates (`credenciados`).
    Credential,
    /// Combined transit export (`transactions`): visit window plus settlement.
    Transit,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Exit => "exit",
            FeedKind::Payment => "payment",
            FeedKind::Credential => "credential",
            FeedKind::Transit => "transit",
        }
    }

    /// Accepts canonical names and the source systems' file-type names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exit" | "saidas" => Ok(FeedKind::Exit),
            "payment" | "pagamentos" => Ok(FeedKind::Payment),
            "credential" | "credenciados" => Ok(FeedKind::Credential),
            "transit" | "transactions" => Ok(FeedKind::Transit),
            other => Err(anyhow!(
                "invalid feed kind '{}'. expected one of: exit | payment | credential | transit \
                 (or saidas | pagamentos | credenciados | transactions)",
                other
            )),
        }
    }

    /// Fields a record of this kind must carry.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            FeedKind::Exit => &[F_CHECKIN, F_CHECKOUT, F_TICKET, F_MATRICULA, F_USE_TYPE],
            FeedKind::Payment => &[
                F_PAID_AT,
                F_TICKET,
                F_MATRICULA,
                F_AMOUNT,
                F_DISCOUNT,
                F_PAYMENT_METHOD,
            ],
            FeedKind::Credential => &[F_MATRICULA, F_CATEGORY],
            FeedKind::Transit => &[
                F_CHECKIN,
                F_CHECKOUT,
                F_TICKET,
                F_MATRICULA,
                F_AMOUNT,
                F_PAYMENT_METHOD,
                F_FARE_TABLE,
            ],
        }
    }

    /// Fields read when present, defaulted when absent.
    pub fn optional_fields(&self) -> &'static [&'static str] {
        match self {
            FeedKind::Payment => &[F_USE_TYPE],
            _ => &[],
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container format of a feed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Csv,
    Xml,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Csv => "csv",
            FeedFormat::Xml => "xml",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FeedFormat::Csv),
            "xml" => Ok(FeedFormat::Xml),
            other => Err(anyhow!("invalid feed format '{}'. expected: csv | xml", other)),
        }
    }

    /// Guess from a file extension; transit exports are always CSV, the
    /// others default to XML.
    pub fn infer(path: &std::path::Path, kind: FeedKind) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") | Some("txt") => FeedFormat::Csv,
            Some("xml") => FeedFormat::Xml,
            _ if kind == FeedKind::Transit => FeedFormat::Csv,
            _ => FeedFormat::Xml,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw record
// ---------------------------------------------------------------------------

/// One decoded source record: canonical field name → raw text.
///
/// `row` is 1-based within the source (data rows for CSV, record elements
/// for XML) and is carried into every error for operator diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    pub row: usize,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}
