//! CSV decoding.
//!
//! ## Header CSV (exit / payment / credential)
//!
//! Column names are case-insensitive and order-independent; source names
//! (`DATA_ENT`, `VALOR`, ...) are accepted next to canonical ones. `;` is
//! the delimiter when the first line has more `;` than `,`.
//!
//! ## Transit CSV (headerless, positional)
//!
//! | index | field            |
//! |-------|------------------|
//! | 1     | `ticket`         |
//! | 3     | `matricula`      |
//! | 6     | `checkin`        |
//! | 7     | `checkout`       |
//! | 10    | `amount`         |
//! | 11    | `payment_method` |
//! | 12    | `fare_table`     |

use ::csv::{ReaderBuilder, StringRecord, Trim};

use super::{canonical_field, DecodeError, DecodeReject, DecodedFeed};
use crate::{
    FeedKind, RawRecord, F_AMOUNT, F_CHECKIN, F_CHECKOUT, F_FARE_TABLE, F_MATRICULA,
    F_PAYMENT_METHOD, F_TICKET,
};

const TRANSIT_COLUMNS: &[(usize, &str)] = &[
    (1, F_TICKET),
    (3, F_MATRICULA),
    (6, F_CHECKIN),
    (7, F_CHECKOUT),
    (10, F_AMOUNT),
    (11, F_PAYMENT_METHOD),
    (12, F_FARE_TABLE),
];

const TRANSIT_MIN_COLUMNS: usize = 13;

/// Decode CSV text for `kind`.
pub fn decode_csv(src: &str, kind: FeedKind) -> Result<DecodedFeed, DecodeError> {
    match kind {
        FeedKind::Transit => decode_positional(src),
        _ => decode_with_header(src, kind),
    }
}

fn sniff_delimiter(src: &str) -> u8 {
    let first = src.lines().next().unwrap_or_default();
    if first.matches(';').count() > first.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn decode_with_header(src: &str, kind: FeedKind) -> Result<DecodedFeed, DecodeError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(sniff_delimiter(src))
        .from_reader(src.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| DecodeError::Csv(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Ok(DecodedFeed::default());
    }

    let columns: Vec<Option<&'static str>> = headers.iter().map(canonical_field).collect();
    for required in kind.required_fields() {
        if !columns.contains(&Some(*required)) {
            return Err(DecodeError::MissingHeader {
                kind,
                column: *required,
            });
        }
    }

    let mut out = DecodedFeed::default();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 1;
        match result {
            Ok(rec) => {
                let mut raw = RawRecord::new(row);
                for (col, value) in columns.iter().zip(rec.iter()) {
                    if let Some(name) = col {
                        raw.fields.insert((*name).to_string(), value.to_string());
                    }
                }
                out.records.push(raw);
            }
            Err(e) => out.rejected.push(DecodeReject {
                row,
                reason: e.to_string(),
            }),
        }
    }
    Ok(out)
}

fn decode_positional(src: &str) -> Result<DecodedFeed, DecodeError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(sniff_delimiter(src))
        .from_reader(src.as_bytes());

    let mut out = DecodedFeed::default();
    let mut rec = StringRecord::new();
    let mut row = 0usize;
    loop {
        row += 1;
        match rdr.read_record(&mut rec) {
            Ok(false) => break,
            Ok(true) if rec.len() < TRANSIT_MIN_COLUMNS => out.rejected.push(DecodeReject {
                row,
                reason: format!(
                    "expected at least {TRANSIT_MIN_COLUMNS} columns, got {}",
                    rec.len()
                ),
            }),
            Ok(true) => {
                let mut raw = RawRecord::new(row);
                for (idx, name) in TRANSIT_COLUMNS {
                    let value = rec.get(*idx).unwrap_or_default();
                    raw.fields.insert((*name).to_string(), value.to_string());
                }
                out.records.push(raw);
            }
            Err(e) if e.is_io_error() => return Err(DecodeError::Csv(e.to_string())),
            Err(e) => out.rejected.push(DecodeReject {
                row,
                reason: e.to_string(),
            }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{F_DISCOUNT, F_PAID_AT};

    #[test]
    fn header_csv_maps_source_columns() {
        let src = "DATA,TICKET,MATRICULA,VALOR,DESCONTO,TP_PAGAMENTO,PLACA\n\
                   2020-10-01T10:00:00,00123,0,\"12,50\",0,CC,ABC1234\n";
        let feed = decode_csv(src, FeedKind::Payment).unwrap();
        assert!(feed.rejected.is_empty());
        let rec = &feed.records[0];
        assert_eq!(rec.row, 1);
        assert_eq!(rec.get(F_PAID_AT), Some("2020-10-01T10:00:00"));
        assert_eq!(rec.get(F_TICKET), Some("00123"));
        assert_eq!(rec.get(F_AMOUNT), Some("12,50"));
        assert_eq!(rec.get(F_DISCOUNT), Some("0"));
        assert_eq!(rec.fields.len(), 6, "unknown columns are dropped");
    }

    #[test]
    fn semicolon_delimiter_is_detected() {
        let src = "matricula;categoria\n982;Diretoria\n";
        let feed = decode_csv(src, FeedKind::Credential).unwrap();
        assert_eq!(feed.records.len(), 1);
        assert_eq!(feed.records[0].get("category"), Some("Diretoria"));
    }

    #[test]
    fn missing_required_header_is_fatal() {
        let src = "ticket,matricula\n1,2\n";
        let err = decode_csv(src, FeedKind::Exit).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingHeader {
                column: "checkin",
                ..
            }
        ));
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        let feed = decode_csv("", FeedKind::Exit).unwrap();
        assert!(feed.records.is_empty());
        let feed = decode_csv("", FeedKind::Transit).unwrap();
        assert!(feed.records.is_empty());
    }

    #[test]
    fn transit_rows_are_positional() {
        let src = "U1,1001,ID,0,A,x,10/01/20 08:45,10/01/20 12:16,x,x,15.00,CC,Tabela 1\n\
                   short,row\n";
        let feed = decode_csv(src, FeedKind::Transit).unwrap();
        assert_eq!(feed.records.len(), 1);
        let rec = &feed.records[0];
        assert_eq!(rec.get(F_TICKET), Some("1001"));
        assert_eq!(rec.get(F_MATRICULA), Some("0"));
        assert_eq!(rec.get(F_CHECKIN), Some("10/01/20 08:45"));
        assert_eq!(rec.get(F_AMOUNT), Some("15.00"));
        assert_eq!(rec.get(F_FARE_TABLE), Some("Tabela 1"));

        assert_eq!(feed.rejected.len(), 1);
        assert_eq!(feed.rejected[0].row, 2);
    }
}
