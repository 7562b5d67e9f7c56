use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Offer;

/// Why an offer cannot take a new redemption right now
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    #[error("offer is inactive")]
    OfferInactive,

    #[error("offer is not open yet")]
    NotYetOpen,

    #[error("offer has expired")]
    Expired,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IneligibleReason::OfferInactive => "offer_inactive",
            IneligibleReason::NotYetOpen => "not_yet_open",
            IneligibleReason::Expired => "expired",
        }
    }
}

/// Stateless eligibility predicate.
///
/// Callers use it to fail fast; the allocator runs it again on the locked
/// offer state, which is the check that counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityGate;

impl ValidityGate {
    pub fn check(offer: &Offer, now: DateTime<Utc>) -> Result<(), IneligibleReason> {
        if !offer.active {
            return Err(IneligibleReason::OfferInactive);
        }
        if offer.valid_from.is_some_and(|from| now < from) {
            return Err(IneligibleReason::NotYetOpen);
        }
        if offer.valid_until.is_some_and(|until| now > until) {
            return Err(IneligibleReason::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOffer, OfferKind};
    use chrono::Duration;

    fn offer(active: bool) -> Offer {
        Offer::from_new(
            NewOffer {
                kind: OfferKind::Event,
                code: None,
                title: "Assembly".to_string(),
                capacity: None,
                valid_from: None,
                valid_until: None,
                active,
                owner_id: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn unbounded_active_offer_is_eligible() {
        assert_eq!(ValidityGate::check(&offer(true), Utc::now()), Ok(()));
    }

    #[test]
    fn inactive_wins_over_window() {
        let mut o = offer(false);
        o.valid_until = Some(Utc::now() - Duration::days(1));
        assert_eq!(
            ValidityGate::check(&o, Utc::now()),
            Err(IneligibleReason::OfferInactive)
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let mut o = offer(true);
        o.valid_from = Some(now);
        o.valid_until = Some(now);
        assert_eq!(ValidityGate::check(&o, now), Ok(()));

        assert_eq!(
            ValidityGate::check(&o, now - Duration::seconds(1)),
            Err(IneligibleReason::NotYetOpen)
        );
        assert_eq!(
            ValidityGate::check(&o, now + Duration::seconds(1)),
            Err(IneligibleReason::Expired)
        );
    }
}
