//! Feed decoders: CSV / SOAP-XML → [`RawRecord`].
//!
//! Structural problems (unreadable file, missing header column, malformed
//! XML document) are returned as `Err`. A single bad record is returned as a
//! [`DecodeReject`] and the rest of the feed still decodes.

mod soap;
mod tabular;

pub use soap::decode_xml;
pub use tabular::decode_csv;

use std::fmt;
use std::path::Path;

use crate::{
    FeedFormat, FeedKind, RawRecord, F_AMOUNT, F_CATEGORY, F_CHECKIN, F_CHECKOUT, F_DISCOUNT,
    F_FARE_TABLE, F_MATRICULA, F_PAID_AT, F_PAYMENT_METHOD, F_TICKET, F_USE_TYPE,
};

// ---------------------------------------------------------------------------
// Output / errors
// ---------------------------------------------------------------------------

/// A record the decoder could not turn into a field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReject {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedFeed {
    pub records: Vec<RawRecord>,
    pub rejected: Vec<DecodeReject>,
}

#[derive(Debug)]
pub enum DecodeError {
    Io(String),
    /// The header row lacks a column the feed kind requires.
    MissingHeader { kind: FeedKind, column: &'static str },
    /// The CSV stream is unreadable as a whole.
    Csv(String),
    /// The XML document is not well-formed.
    Xml(String),
    /// No decoder exists for this kind in this format.
    Unsupported { kind: FeedKind, format: FeedFormat },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(msg) => write!(f, "feed io error: {msg}"),
            DecodeError::MissingHeader { kind, column } => {
                write!(f, "{kind} csv missing required header column: '{column}'")
            }
            DecodeError::Csv(msg) => write!(f, "csv error: {msg}"),
            DecodeError::Xml(msg) => write!(f, "xml error: {msg}"),
            DecodeError::Unsupported { kind, format } => {
                write!(f, "no {format:?} decoder for {kind} feeds")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read and decode a feed file.
pub fn decode_file(
    path: &Path,
    kind: FeedKind,
    format: FeedFormat,
) -> Result<DecodedFeed, DecodeError> {
    let bytes = std::fs::read(path)
        .map_err(|e| DecodeError::Io(format!("read '{}': {e}", path.display())))?;
    let src = decode_text(bytes);

    match format {
        FeedFormat::Csv => decode_csv(&src, kind),
        FeedFormat::Xml => decode_xml(src.as_bytes(), kind),
    }
}

/// Source exports are UTF-8 or Latin-1. Invalid UTF-8 is read as Latin-1,
/// where every byte is its own code point. A UTF-8 BOM is dropped.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => match s.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_string(),
            None => s,
        },
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Map a CSV header or XML element name onto a canonical field name.
/// Unknown names are ignored by the decoders.
pub(crate) fn canonical_field(name: &str) -> Option<&'static str> {
    let key = name.trim().to_ascii_lowercase().replace('-', "_");
    let f = match key.as_str() {
        "checkin" | "data_ent" | "dataent" => F_CHECKIN,
        "checkout" | "data_sai" | "datasai" => F_CHECKOUT,
        "ticket" | "sequence" => F_TICKET,
        "matricula" => F_MATRICULA,
        "use_type" | "tp_acesso" | "tpacesso" | "tp" => F_USE_TYPE,
        "paid_at" | "data" | "data_pagto" | "datapagto" => F_PAID_AT,
        "amount" | "valor" => F_AMOUNT,
        "discount" | "desconto" => F_DISCOUNT,
        "payment_method" | "tp_pagamento" | "tppagamento" => F_PAYMENT_METHOD,
        "category" | "categoria" => F_CATEGORY,
        "fare_table" | "tabela" => F_FARE_TABLE,
        _ => return None,
    };
    Some(f)
}
