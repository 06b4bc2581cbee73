//! Event Normalizer: [`RawRecord`] → typed [`FeedEvent`].
//!
//! Pure functions. Amounts become integer micros without floating point,
//! timestamps become UTC instants, source codes become canonical enums, and
//! ticket / matricula identifiers are canonicalised so numeric and textual
//! sources produce the same business key.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use prk_schemas::{
    CredentialEvent, ExitEvent, FeedEvent, PaymentEvent, PaymentMethod, Settlement, UseType,
    MICROS_SCALE, UNKNOWN_ID,
};

use crate::{
    FeedKind, RawRecord, F_AMOUNT, F_CATEGORY, F_CHECKIN, F_CHECKOUT, F_DISCOUNT, F_FARE_TABLE,
    F_MATRICULA, F_PAID_AT, F_PAYMENT_METHOD, F_TICKET, F_USE_TYPE,
};

// ---------------------------------------------------------------------------
// Policy / errors
// ---------------------------------------------------------------------------

/// What to do with a code outside the canonical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodePolicy {
    /// Reject the record with [`NormalizeError::UnknownCode`].
    #[default]
    Strict,
    /// Map the code to `Outro`.
    DefaultToOther,
}

impl CodePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(CodePolicy::Strict),
            "default_to_other" => Some(CodePolicy::DefaultToOther),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodePolicy::Strict => "strict",
            CodePolicy::DefaultToOther => "default_to_other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// Missing or unparseable field.
    MalformedRecord {
        row: usize,
        field: &'static str,
        raw: String,
        reason: String,
    },
    /// A payment-method or use-type code outside the canonical table
    /// (strict policy only).
    UnknownCode {
        row: usize,
        field: &'static str,
        raw: String,
    },
}

impl NormalizeError {
    pub fn row(&self) -> usize {
        match self {
            NormalizeError::MalformedRecord { row, .. } | NormalizeError::UnknownCode { row, .. } => {
                *row
            }
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            NormalizeError::MalformedRecord { field, .. }
            | NormalizeError::UnknownCode { field, .. } => field,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::MalformedRecord { raw, .. } | NormalizeError::UnknownCode { raw, .. } => {
                raw
            }
        }
    }
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::MalformedRecord {
                row,
                field,
                raw,
                reason,
            } => write!(f, "row {row}: malformed field '{field}' ('{raw}'): {reason}"),
            NormalizeError::UnknownCode { row, field, raw } => {
                write!(f, "row {row}: unknown code '{raw}' in field '{field}'")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Field conversions
// ---------------------------------------------------------------------------

/// Convert a decimal amount string to integer micros.
///
/// - `.` or `,` as the (single) decimal separator.
/// - At most 6 decimal places; no sign; empty is zero.
/// - No floating point at any stage.
pub fn amount_to_micros(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if s.starts_with('-') {
        return Err("negative amount".to_string());
    }
    let digits = s.strip_prefix('+').unwrap_or(s);

    let seps = digits.chars().filter(|c| *c == '.' || *c == ',').count();
    if seps > 1 {
        return Err("more than one decimal separator".to_string());
    }
    let (int_part, frac_part) = match digits.split_once(|c: char| c == '.' || c == ',') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err("not a decimal number".to_string());
    }
    if frac_part.len() > 6 {
        return Err("more than 6 decimal places".to_string());
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| "integer part out of range".to_string())?
    };
    let frac_val: i64 = if frac_part.is_empty() {
        0
    } else {
        let scale = 10_i64.pow(6 - frac_part.len() as u32);
        frac_part
            .parse::<i64>()
            .map_err(|_| "fraction out of range".to_string())?
            * scale
    };

    int_val
        .checked_mul(MICROS_SCALE)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| "amount out of range".to_string())
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Transit exports: `MM/DD/YY HH:MM`, two-digit year in the 2000s.
const TRANSIT_FORMAT: &str = "%m/%d/%y %H:%M";

/// Years a feed timestamp may carry. Anything outside is a typo or a
/// sentinel, never a visit.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=9999;

/// Parse a source timestamp. Naive values are read as UTC; RFC 3339 values
/// with an offset are converted to UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty timestamp".to_string());
    }
    let dt = parse_any_timestamp(s)?;
    if !YEAR_RANGE.contains(&dt.year()) {
        return Err(format!(
            "year {} outside {}..={}",
            dt.year(),
            YEAR_RANGE.start(),
            YEAR_RANGE.end()
        ));
    }
    Ok(dt)
}

fn parse_any_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TRANSIT_FORMAT) {
        let naive = if naive.year() < 2000 {
            naive
                .with_year(naive.year() + 100)
                .ok_or_else(|| "year out of range".to_string())?
        } else {
            naive
        };
        return Ok(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    Err("unrecognised timestamp format".to_string())
}

/// Canonical ticket / matricula: trimmed, `"0"` when empty, and leading
/// zeros dropped from all-digit values.
pub fn normalize_id(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return UNKNOWN_ID.to_string();
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        let stripped = s.trim_start_matches('0');
        if stripped.is_empty() {
            return UNKNOWN_ID.to_string();
        }
        return stripped.to_string();
    }
    s.to_string()
}

/// Map a payment-method code or label. `None` means unknown under `Strict`.
pub fn payment_method_from_code(raw: &str, policy: CodePolicy) -> Option<PaymentMethod> {
    let code = raw.trim();
    let m = match code.to_ascii_uppercase().as_str() {
        "" | "NI" => Some(PaymentMethod::NotInformed),
        "CC" => Some(PaymentMethod::Creditcard),
        "CD" => Some(PaymentMethod::Debitcard),
        "DI" => Some(PaymentMethod::Dinheiro),
        "CA" => Some(PaymentMethod::Cancelado),
        "IS" => Some(PaymentMethod::Isento),
        "CH" => Some(PaymentMethod::Cheque),
        "CO" => Some(PaymentMethod::ConectCar),
        "SP" => Some(PaymentMethod::SemParar),
        "VE" => Some(PaymentMethod::Veloe),
        "TR" | "TRANSFERENCIA" => Some(PaymentMethod::Transferencia),
        "OU" => Some(PaymentMethod::Outro),
        _ => {
            let lower = code.to_lowercase();
            PaymentMethod::ALL
                .iter()
                .copied()
                .find(|m| m.as_str().to_lowercase() == lower)
        }
    };
    match (m, policy) {
        (Some(m), _) => Some(m),
        (None, CodePolicy::DefaultToOther) => Some(PaymentMethod::Outro),
        (None, CodePolicy::Strict) => None,
    }
}

/// Map a use-type code or label. `None` means unknown under `Strict`.
pub fn use_type_from_code(raw: &str, policy: CodePolicy) -> Option<UseType> {
    let u = match raw.trim().to_ascii_uppercase().as_str() {
        "R" | "MENSALISTA" => Some(UseType::Mensalista),
        "A" | "AVULSO" | "ROTATIVO" => Some(UseType::Avulso),
        "" | "L" | "LOCAL" | "O" | "OUTRO" => Some(UseType::Outro),
        _ => None,
    };
    match (u, policy) {
        (Some(u), _) => Some(u),
        (None, CodePolicy::DefaultToOther) => Some(UseType::Outro),
        (None, CodePolicy::Strict) => None,
    }
}

/// Transit exports carry a tariff table instead of a use code.
pub fn use_type_from_fare_table(table: &str) -> UseType {
    if table.trim() == "Mensalista" {
        UseType::Mensalista
    } else {
        UseType::Avulso
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize one raw record of `kind` into a feed event.
pub fn normalize(
    kind: FeedKind,
    rec: &RawRecord,
    policy: CodePolicy,
) -> Result<FeedEvent, NormalizeError> {
    let f = Fields { rec, policy };
    match kind {
        FeedKind::Exit => Ok(FeedEvent::Exit(ExitEvent {
            sequence: f.id(F_TICKET)?,
            matricula: f.id(F_MATRICULA)?,
            checkin_at: f.timestamp(F_CHECKIN)?,
            checkout_at: f.timestamp(F_CHECKOUT)?,
            use_type: f.use_type(F_USE_TYPE)?,
            fare_name: None,
            settlement: None,
        })),
        FeedKind::Payment => {
            let use_type = match rec.get(F_USE_TYPE) {
                Some(_) => f.use_type(F_USE_TYPE)?,
                None => UseType::Outro,
            };
            Ok(FeedEvent::Payment(PaymentEvent {
                sequence: f.id(F_TICKET)?,
                matricula: f.id(F_MATRICULA)?,
                paid_at: f.timestamp(F_PAID_AT)?,
                amount_micros: f.amount(F_AMOUNT)?,
                discount_micros: f.amount(F_DISCOUNT)?,
                method: f.payment_method(F_PAYMENT_METHOD)?,
                use_type,
            }))
        }
        FeedKind::Credential => {
            let matricula = f.id(F_MATRICULA)?;
            if matricula == UNKNOWN_ID {
                return Err(f.malformed(F_MATRICULA, "credential without matricula"));
            }
            Ok(FeedEvent::Credential(CredentialEvent {
                matricula,
                category: f.required(F_CATEGORY)?.trim().to_string(),
            }))
        }
        FeedKind::Transit => {
            let table = f.required(F_FARE_TABLE)?.trim();
            Ok(FeedEvent::Exit(ExitEvent {
                sequence: f.id(F_TICKET)?,
                matricula: f.id(F_MATRICULA)?,
                checkin_at: f.timestamp(F_CHECKIN)?,
                checkout_at: f.timestamp(F_CHECKOUT)?,
                use_type: use_type_from_fare_table(table),
                fare_name: (!table.is_empty()).then(|| table.to_string()),
                settlement: Some(Settlement {
                    paid_micros: f.amount(F_AMOUNT)?,
                    method: f.payment_method(F_PAYMENT_METHOD)?,
                }),
            }))
        }
    }
}

struct Fields<'a> {
    rec: &'a RawRecord,
    policy: CodePolicy,
}

impl<'a> Fields<'a> {
    fn malformed(&self, field: &'static str, reason: impl Into<String>) -> NormalizeError {
        NormalizeError::MalformedRecord {
            row: self.rec.row,
            field,
            raw: self.rec.get(field).unwrap_or_default().to_string(),
            reason: reason.into(),
        }
    }

    fn required(&self, field: &'static str) -> Result<&'a str, NormalizeError> {
        self.rec
            .get(field)
            .ok_or_else(|| self.malformed(field, "missing field"))
    }

    fn id(&self, field: &'static str) -> Result<String, NormalizeError> {
        Ok(normalize_id(self.required(field)?))
    }

    fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, NormalizeError> {
        parse_timestamp(self.required(field)?).map_err(|reason| self.malformed(field, reason))
    }

    fn amount(&self, field: &'static str) -> Result<i64, NormalizeError> {
        amount_to_micros(self.required(field)?).map_err(|reason| self.malformed(field, reason))
    }

    fn payment_method(&self, field: &'static str) -> Result<PaymentMethod, NormalizeError> {
        let raw = self.required(field)?;
        payment_method_from_code(raw, self.policy).ok_or_else(|| self.unknown(field, raw))
    }

    fn use_type(&self, field: &'static str) -> Result<UseType, NormalizeError> {
        let raw = self.required(field)?;
        use_type_from_code(raw, self.policy).ok_or_else(|| self.unknown(field, raw))
    }

    fn unknown(&self, field: &'static str, raw: &str) -> NormalizeError {
        NormalizeError::UnknownCode {
            row: self.rec.row,
            field,
            raw: raw.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
