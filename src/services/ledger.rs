use std::sync::Arc;

use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{RedemptionFilter, RedemptionRecord};
use crate::store::RedemptionStore;

/// Read-only access to redemption records for reporting and export.
///
/// Records are only ever written by the allocator.
#[derive(Clone)]
pub struct RedemptionLedger {
    store: Arc<dyn RedemptionStore>,
}

impl RedemptionLedger {
    pub fn new(store: Arc<dyn RedemptionStore>) -> Self {
        Self { store }
    }

    /// Every record of the offer, cancelled ones included, oldest first
    pub async fn list_by_offer(&self, offer_id: Uuid) -> Result<Vec<RedemptionRecord>, EngineError> {
        Ok(self.store.list_by_offer(offer_id).await?)
    }

    pub async fn list_all(&self, filter: &RedemptionFilter) -> Result<Vec<RedemptionRecord>, EngineError> {
        Ok(self.store.list_redemptions(filter).await?)
    }

    pub async fn find(&self, redemption_id: Uuid) -> Result<RedemptionRecord, EngineError> {
        self.store
            .get_redemption(redemption_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("redemption {redemption_id}")))
    }
}
