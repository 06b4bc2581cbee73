//! SOAP-XML decoding.
//!
//! Source web services wrap records in envelopes whose shape varies by
//! operation (`GetSaidasResult`, diffgram `DocumentElement`, ...). The decoder
//! does not follow the envelope: it streams the document, picks every element
//! named after the feed's record type at any depth, and maps its direct
//! children onto canonical field names.
//!
//! | kind       | record element |
//! |------------|----------------|
//! | exit       | `SAIDA`        |
//! | payment    | `PAGTO`        |
//! | credential | `CREDENCIADO`  |
//!
//! Element names are matched on their local part, case-insensitively.

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{canonical_field, DecodeError, DecodeReject, DecodedFeed};
use crate::{FeedFormat, FeedKind, RawRecord};

fn record_element(kind: FeedKind) -> Option<&'static str> {
    match kind {
        FeedKind::Exit => Some("SAIDA"),
        FeedKind::Payment => Some("PAGTO"),
        FeedKind::Credential => Some("CREDENCIADO"),
        FeedKind::Transit => None,
    }
}

/// Record being assembled.
struct Pending {
    rec: RawRecord,
    /// Depth below the record element (1 = direct child).
    depth: usize,
    /// Canonical field of the direct child currently open.
    field: Option<&'static str>,
    /// First per-record problem; the record is rejected when it closes.
    poisoned: Option<String>,
}

/// Decode an XML document for `kind`.
pub fn decode_xml<R: BufRead>(src: R, kind: FeedKind) -> Result<DecodedFeed, DecodeError> {
    let record_name = record_element(kind).ok_or(DecodeError::Unsupported {
        kind,
        format: FeedFormat::Xml,
    })?;

    let mut reader = Reader::from_reader(src);
    reader.trim_text(true);

    let mut out = DecodedFeed::default();
    let mut buf = Vec::new();
    let mut pending: Option<Pending> = None;
    let mut row = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            DecodeError::Xml(format!("at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                match pending.as_mut() {
                    None if name.eq_ignore_ascii_case(record_name) => {
                        row += 1;
                        pending = Some(Pending {
                            rec: RawRecord::new(row),
                            depth: 0,
                            field: None,
                            poisoned: None,
                        });
                    }
                    None => {}
                    Some(p) => {
                        p.depth += 1;
                        if p.depth == 1 {
                            p.field = canonical_field(&name);
                            if let Some(f) = p.field {
                                p.rec.fields.insert(f.to_string(), String::new());
                            }
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(p) = pending.as_mut() {
                    if p.depth == 0 {
                        if let Some(f) = canonical_field(&local_name(e.local_name().as_ref())) {
                            p.rec.fields.insert(f.to_string(), String::new());
                        }
                    }
                } else if local_name(e.local_name().as_ref()).eq_ignore_ascii_case(record_name) {
                    row += 1;
                    out.rejected.push(DecodeReject {
                        row,
                        reason: format!("empty <{record_name}/> element"),
                    });
                }
            }
            Event::Text(t) => {
                if let Some(p) = pending.as_mut() {
                    match t.unescape() {
                        Ok(text) => p.append(&text),
                        Err(e) => p.poison(format!("bad text: {e}")),
                    }
                }
            }
            Event::CData(c) => {
                if let Some(p) = pending.as_mut() {
                    match std::str::from_utf8(&c) {
                        Ok(text) => p.append(text),
                        Err(e) => p.poison(format!("bad cdata: {e}")),
                    }
                }
            }
            Event::End(_) => {
                if let Some(p) = pending.as_mut() {
                    if p.depth == 0 {
                        if let Some(done) = pending.take() {
                            match done.poisoned {
                                Some(reason) => out.rejected.push(DecodeReject {
                                    row: done.rec.row,
                                    reason,
                                }),
                                None => out.records.push(done.rec),
                            }
                        }
                    } else {
                        if p.depth == 1 {
                            p.field = None;
                        }
                        p.depth -= 1;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(p) = pending {
        return Err(DecodeError::Xml(format!(
            "document ended inside <{record_name}> (record {})",
            p.rec.row
        )));
    }
    Ok(out)
}

impl Pending {
    fn append(&mut self, text: &str) {
        if self.depth != 1 {
            return;
        }
        if let Some(f) = self.field {
            self.rec.fields.entry(f.to_string()).or_default().push_str(text);
        }
    }

    fn poison(&mut self, reason: String) {
        self.poisoned.get_or_insert(reason);
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{F_CHECKIN, F_MATRICULA, F_TICKET, F_USE_TYPE};

    const SAIDAS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GetSaidasResponse xmlns="http://tempuri.org/">
      <GetSaidasResult>
        <SAIDA>
          <DATA_ENT>2020-10-01T08:45:46</DATA_ENT>
          <DATA_SAI>2020-10-01T12:16:24</DATA_SAI>
          <TP_ACESSO>A</TP_ACESSO>
          <TICKET>123</TICKET>
          <MATRICULA>0</MATRICULA>
          <PLACA>ABC1234</PLACA>
        </SAIDA>
        <SAIDA>
          <DATA_ENT>2020-10-01T09:00:00</DATA_ENT>
          <DATA_SAI>2020-10-01T10:00:00</DATA_SAI>
          <TP_ACESSO/>
          <TICKET>124</TICKET>
          <MATRICULA>982</MATRICULA>
        </SAIDA>
      </GetSaidasResult>
    </GetSaidasResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn saidas_envelope_decodes_every_record() {
        let feed = decode_xml(SAIDAS.as_bytes(), FeedKind::Exit).unwrap();
        assert!(feed.rejected.is_empty());
        assert_eq!(feed.records.len(), 2);

        let first = &feed.records[0];
        assert_eq!(first.row, 1);
        assert_eq!(first.get(F_CHECKIN), Some("2020-10-01T08:45:46"));
        assert_eq!(first.get(F_TICKET), Some("123"));
        assert_eq!(first.get(F_USE_TYPE), Some("A"));
        assert_eq!(first.fields.len(), 5, "PLACA is not a canonical field");

        let second = &feed.records[1];
        assert_eq!(second.get(F_USE_TYPE), Some(""));
        assert_eq!(second.get(F_MATRICULA), Some("982"));
    }

    #[test]
    fn diffgram_payments_and_entities() {
        let src = r#"<Envelope><Body><diffgram><DocumentElement>
            <PAGTO><Ticket>77</Ticket><Matricula>0</Matricula><Tp>A</Tp>
              <Data>2020-10-01T10:00:00</Data><Valor>12,50</Valor>
              <Desconto>0</Desconto><TpPagamento>CC</TpPagamento>
              <Obs>a &amp; b</Obs></PAGTO>
        </DocumentElement></diffgram></Body></Envelope>"#;
        let feed = decode_xml(src.as_bytes(), FeedKind::Payment).unwrap();
        assert_eq!(feed.records.len(), 1);
        let rec = &feed.records[0];
        assert_eq!(rec.get("amount"), Some("12,50"));
        assert_eq!(rec.get("payment_method"), Some("CC"));
        assert_eq!(rec.get("paid_at"), Some("2020-10-01T10:00:00"));
    }

    #[test]
    fn credenciados_use_category() {
        let src = "<r><CREDENCIADO><MATRICULA>982</MATRICULA><CATEGORIA>Diretoria</CATEGORIA></CREDENCIADO></r>";
        let feed = decode_xml(src.as_bytes(), FeedKind::Credential).unwrap();
        assert_eq!(feed.records[0].get("category"), Some("Diretoria"));
    }

    #[test]
    fn malformed_document_is_fatal() {
        let src = "<r><SAIDA><TICKET>1</TICKET></r>";
        assert!(matches!(
            decode_xml(src.as_bytes(), FeedKind::Exit),
            Err(DecodeError::Xml(_))
        ));
    }

    #[test]
    fn bad_entity_rejects_only_that_record() {
        let src = "<r><SAIDA><TICKET>1&bogus;</TICKET></SAIDA><SAIDA><TICKET>2</TICKET></SAIDA></r>";
        let feed = decode_xml(src.as_bytes(), FeedKind::Exit).unwrap();
        assert_eq!(feed.rejected.len(), 1);
        assert_eq!(feed.rejected[0].row, 1);
        assert_eq!(feed.records.len(), 1);
        assert_eq!(feed.records[0].get(F_TICKET), Some("2"));
    }

    #[test]
    fn transit_has_no_xml_decoder() {
        assert!(matches!(
            decode_xml("<r/>".as_bytes(), FeedKind::Transit),
            Err(DecodeError::Unsupported { .. })
        ));
    }
}
