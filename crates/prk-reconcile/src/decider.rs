//! Revision Decider: is an incoming event the same visit as the stored
//! record, or a new visit that reuses its key?

use prk_schemas::{CanonicalTransaction, FeedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    /// No stored record matched.
    Create,
    /// Same visit: merge into the stored record.
    Update,
    /// Same key, different visit.
    Replace,
}

impl Revision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Revision::Create => "create",
            Revision::Update => "update",
            Revision::Replace => "replace",
        }
    }
}

/// How a `Replace` is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacePolicy {
    /// Insert the new visit as its own record; the old one is kept.
    #[default]
    InsertNew,
    /// Reset the matched record in place (same id), version-guarded.
    Overwrite,
}

impl ReplacePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert_new" => Some(ReplacePolicy::InsertNew),
            "overwrite" => Some(ReplacePolicy::Overwrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplacePolicy::InsertNew => "insert_new",
            ReplacePolicy::Overwrite => "overwrite",
        }
    }
}

pub fn decide(stored: Option<&CanonicalTransaction>, event: &FeedEvent) -> Revision {
    let Some(stored) = stored else {
        return Revision::Create;
    };
    match event {
        FeedEvent::Payment(p) => match stored.payment_at {
            None => Revision::Update,
            Some(at) if at == p.paid_at => Revision::Update,
            Some(_) => Revision::Replace,
        },
        FeedEvent::Exit(e) => match (stored.checkin_at, stored.checkout_at) {
            (None, None) => Revision::Update,
            (Some(ci), Some(co)) if ci == e.checkin_at && co == e.checkout_at => Revision::Update,
            _ => Revision::Replace,
        },
        FeedEvent::Credential(_) => Revision::Update,
    }
}

/// Which of several records sharing a key an event applies to.
///
/// `matches` is newest first. The newest record the event is the same visit
/// as wins; otherwise the newest record. Re-delivering a feed with two
/// visits under one key then updates both instead of replacing again.
pub fn pick_match<'a>(
    matches: &'a [CanonicalTransaction],
    event: &FeedEvent,
) -> Option<&'a CanonicalTransaction> {
    matches
        .iter()
        .find(|m| decide(Some(m), event) == Revision::Update)
        .or_else(|| matches.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use prk_schemas::{CredentialEvent, ExitEvent, Parking, PaymentEvent, PaymentMethod, UseType};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 10, 1, h, 0, 0).unwrap()
    }

    fn stored() -> CanonicalTransaction {
        CanonicalTransaction::new_visit(Parking::new(1, "Monza", "monza"), "123", "0", "On-demand")
    }

    fn payment(h: u32) -> FeedEvent {
        FeedEvent::Payment(PaymentEvent {
            sequence: "123".into(),
            matricula: "0".into(),
            paid_at: at(h),
            amount_micros: 0,
            discount_micros: 0,
            method: PaymentMethod::Dinheiro,
            use_type: UseType::Avulso,
        })
    }

    fn exit(ci: u32, co: u32) -> FeedEvent {
        FeedEvent::Exit(ExitEvent {
            sequence: "123".into(),
            matricula: "0".into(),
            checkin_at: at(ci),
            checkout_at: at(co),
            use_type: UseType::Avulso,
            fare_name: None,
            settlement: None,
        })
    }

    #[test]
    fn no_match_creates() {
        assert_eq!(decide(None, &payment(10)), Revision::Create);
        assert_eq!(decide(None, &exit(8, 9)), Revision::Create);
    }

    #[test]
    fn payment_same_instant_updates_other_instant_replaces() {
        let mut s = stored();
        assert_eq!(decide(Some(&s), &payment(10)), Revision::Update);
        s.payment_at = Some(at(10));
        assert_eq!(decide(Some(&s), &payment(10)), Revision::Update);
        assert_eq!(decide(Some(&s), &payment(11)), Revision::Replace);
    }

    #[test]
    fn exit_same_window_updates_other_window_replaces() {
        let mut s = stored();
        assert_eq!(decide(Some(&s), &exit(8, 9)), Revision::Update);
        s.checkin_at = Some(at(8));
        s.checkout_at = Some(at(9));
        assert_eq!(decide(Some(&s), &exit(8, 9)), Revision::Update);
        assert_eq!(decide(Some(&s), &exit(8, 10)), Revision::Replace);
        assert_eq!(decide(Some(&s), &exit(7, 9)), Revision::Replace);
    }

    #[test]
    fn half_known_window_is_a_different_visit() {
        let mut s = stored();
        s.checkin_at = Some(at(8));
        assert_eq!(decide(Some(&s), &exit(8, 9)), Revision::Replace);
    }

    #[test]
    fn credential_always_updates_a_match() {
        let ev = FeedEvent::Credential(CredentialEvent {
            matricula: "982".into(),
            category: "Diretoria".into(),
        });
        assert_eq!(decide(Some(&stored()), &ev), Revision::Update);
        assert_eq!(decide(None, &ev), Revision::Create);
    }

    #[test]
    fn pick_match_prefers_the_same_visit_over_the_newest() {
        let window = |ci, co| {
            let mut s = stored();
            s.checkin_at = Some(at(ci));
            s.checkout_at = Some(at(co));
            s
        };
        // newest first
        let matches = vec![window(14, 15), window(8, 9)];

        let picked = pick_match(&matches, &exit(8, 9)).unwrap();
        assert_eq!(picked.checkin_at, Some(at(8)));
        let picked = pick_match(&matches, &exit(14, 15)).unwrap();
        assert_eq!(picked.checkin_at, Some(at(14)));

        let picked = pick_match(&matches, &exit(20, 21)).unwrap();
        assert_eq!(picked.checkin_at, Some(at(14)), "no same visit: newest");
        assert!(pick_match(&[], &exit(8, 9)).is_none());
    }
}
