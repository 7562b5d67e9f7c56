use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{normalize_code, Availability, NewOffer, Offer, OfferKind, OfferUpdate};
use crate::store::RedemptionStore;

const CODE_MIN_LEN: usize = 3;
const CODE_MAX_LEN: usize = 32;

/// Read-mostly view of published offers
#[derive(Clone)]
pub struct OfferCatalog {
    store: Arc<dyn RedemptionStore>,
}

impl OfferCatalog {
    pub fn new(store: Arc<dyn RedemptionStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, offer_id: Uuid) -> Result<Offer, EngineError> {
        self.store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("offer {offer_id}")))
    }

    /// Benefit lookup; the code is upper-cased first. May return an
    /// inactive benefit, which the validity gate then turns away.
    pub async fn get_by_code(&self, code: &str) -> Result<Offer, EngineError> {
        let code = normalize_code(code);
        self.store
            .get_offer_by_code(&code)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("benefit code {code}")))
    }

    /// Capacity, active count and what is left. A snapshot only; the
    /// allocator re-reads under lock.
    pub async fn availability(&self, offer_id: Uuid) -> Result<Availability, EngineError> {
        let offer = self.get(offer_id).await?;
        let active_count = self.store.count_active(offer_id).await?;

        Ok(Availability {
            capacity: offer.capacity,
            active_count,
            remaining: offer.remaining(active_count),
        })
    }

    /// Publishes a new offer on behalf of its owner
    #[tracing::instrument(skip(self, data), fields(kind = %data.kind))]
    pub async fn publish(&self, data: NewOffer) -> Result<Offer, EngineError> {
        validate_new(&data)?;
        let offer = Offer::from_new(data, Utc::now());
        self.store.insert_offer(&offer).await?;

        tracing::info!(offer_id = %offer.id, code = ?offer.code, "Offer published");
        Ok(offer)
    }

    /// Edits an offer under its unit of work, so the edit is ordered with
    /// respect to in-flight reservations
    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, offer_id: Uuid, update: OfferUpdate) -> Result<Offer, EngineError> {
        let mut unit = self
            .store
            .lock_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("offer {offer_id}")))?;

        let mut offer = unit.offer().clone();
        offer.apply(update, Utc::now());
        validate_shape(&offer)?;

        unit.update_offer(&offer).await?;
        unit.commit().await?;

        tracing::info!(offer_id = %offer.id, active = offer.active, capacity = ?offer.capacity, "Offer updated");
        Ok(offer)
    }
}

fn validate_new(data: &NewOffer) -> Result<(), EngineError> {
    if data.title.trim().is_empty() {
        return Err(EngineError::Validation("Title is required".to_string()));
    }

    match (data.kind, data.code.as_deref().map(normalize_code)) {
        (OfferKind::Benefit, None) => {
            return Err(EngineError::Validation("Benefits require a code".to_string()));
        }
        (OfferKind::Benefit, Some(code)) => {
            let valid_chars = code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
            if !valid_chars || !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&code.len()) {
                return Err(EngineError::Validation(format!(
                    "Code must be {CODE_MIN_LEN}-{CODE_MAX_LEN} letters or digits"
                )));
            }
        }
        (_, Some(_)) => {
            return Err(EngineError::Validation(
                "Only benefits carry a code".to_string(),
            ));
        }
        (_, None) => {}
    }

    check_capacity_and_window(data.capacity, data.valid_from, data.valid_until)
}

fn validate_shape(offer: &Offer) -> Result<(), EngineError> {
    if offer.title.is_empty() {
        return Err(EngineError::Validation("Title is required".to_string()));
    }
    check_capacity_and_window(offer.capacity, offer.valid_from, offer.valid_until)
}

fn check_capacity_and_window(
    capacity: Option<i32>,
    valid_from: Option<chrono::DateTime<Utc>>,
    valid_until: Option<chrono::DateTime<Utc>>,
) -> Result<(), EngineError> {
    if capacity.is_some_and(|c| c < 0) {
        return Err(EngineError::Validation(
            "Capacity cannot be negative".to_string(),
        ));
    }
    if let (Some(from), Some(until)) = (valid_from, valid_until) {
        if from > until {
            return Err(EngineError::Validation(
                "Validity window ends before it starts".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn catalog() -> OfferCatalog {
        OfferCatalog::new(Arc::new(MemoryStore::new()))
    }

    fn benefit(code: &str) -> NewOffer {
        NewOffer {
            kind: OfferKind::Benefit,
            code: Some(code.to_string()),
            title: "10% off".to_string(),
            capacity: Some(5),
            valid_from: None,
            valid_until: None,
            active: true,
            owner_id: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn code_lookup_is_case_insensitive() {
        let catalog = catalog();
        let offer = catalog.publish(benefit("Promo10")).await.unwrap();
        assert_eq!(offer.code.as_deref(), Some("PROMO10"));

        let found = catalog.get_by_code("promo10").await.unwrap();
        assert_eq!(found.id, offer.id);
        assert!(matches!(
            catalog.get_by_code("nope").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_offers() {
        let catalog = catalog();

        let mut no_code = benefit("X");
        no_code.code = None;
        assert!(matches!(catalog.publish(no_code).await, Err(EngineError::Validation(_))));

        assert!(matches!(
            catalog.publish(benefit("a-b")).await,
            Err(EngineError::Validation(_))
        ));

        let mut negative = benefit("NEG1");
        negative.capacity = Some(-1);
        assert!(matches!(catalog.publish(negative).await, Err(EngineError::Validation(_))));

        let mut coded_training = benefit("TRAIN1");
        coded_training.kind = OfferKind::Training;
        assert!(matches!(
            catalog.publish(coded_training).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_active_code_conflicts() {
        let catalog = catalog();
        catalog.publish(benefit("DUP1")).await.unwrap();
        assert!(matches!(
            catalog.publish(benefit("dup1")).await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_edits_capacity_without_touching_records() {
        let catalog = catalog();
        let offer = catalog.publish(benefit("EDIT1")).await.unwrap();

        let updated = catalog
            .update(
                offer.id,
                OfferUpdate {
                    capacity: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.capacity, None);

        let availability = catalog.availability(offer.id).await.unwrap();
        assert_eq!(availability.remaining, None);
        assert_eq!(availability.active_count, 0);
    }
}
