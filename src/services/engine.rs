use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{IdentityKey, Offer, OfferKind, RedemptionRecord};
use crate::services::{
    allocator::CapacityAllocator,
    catalog::OfferCatalog,
    identity::{Caller, IdentityResolver},
    ledger::RedemptionLedger,
    validity::ValidityGate,
};
use crate::store::RedemptionStore;

/// Entry point used by the HTTP layer.
///
/// Redeem/enroll: catalog -> validity gate -> identity -> allocator.
/// Cancel: identity -> allocator release.
#[derive(Clone)]
pub struct RedemptionEngine {
    pub catalog: OfferCatalog,
    pub resolver: IdentityResolver,
    pub allocator: CapacityAllocator,
    pub ledger: RedemptionLedger,
}

impl RedemptionEngine {
    pub fn new(store: Arc<dyn RedemptionStore>) -> Self {
        Self {
            catalog: OfferCatalog::new(Arc::clone(&store)),
            resolver: IdentityResolver::new(),
            allocator: CapacityAllocator::new(Arc::clone(&store)),
            ledger: RedemptionLedger::new(store),
        }
    }

    /// Redeems a benefit by its public code
    pub async fn redeem_benefit(&self, code: &str, caller: &Caller) -> Result<RedemptionRecord, EngineError> {
        let offer = self.catalog.get_by_code(code).await?;
        self.reserve_checked(&offer, caller).await
    }

    /// Enrolls in a training or event addressed by id
    pub async fn enroll(
        &self,
        kind: OfferKind,
        offer_id: Uuid,
        caller: &Caller,
    ) -> Result<RedemptionRecord, EngineError> {
        let offer = self.offer_of_kind(kind, offer_id).await?;
        self.reserve_checked(&offer, caller).await
    }

    /// Gives back an enrollment. The caller is identified by key only, so
    /// public callers need nothing but their CPF.
    pub async fn cancel(
        &self,
        kind: OfferKind,
        offer_id: Uuid,
        identity_key: &IdentityKey,
    ) -> Result<RedemptionRecord, EngineError> {
        self.offer_of_kind(kind, offer_id).await?;
        self.allocator.release(offer_id, identity_key).await
    }

    async fn offer_of_kind(&self, kind: OfferKind, offer_id: Uuid) -> Result<Offer, EngineError> {
        let offer = self.catalog.get(offer_id).await?;
        if offer.kind != kind {
            return Err(EngineError::NotFound(format!("{kind} {offer_id}")));
        }
        Ok(offer)
    }

    async fn reserve_checked(&self, offer: &Offer, caller: &Caller) -> Result<RedemptionRecord, EngineError> {
        // advisory: the allocator checks again under lock
        ValidityGate::check(offer, Utc::now()).map_err(EngineError::OfferNotEligible)?;

        let identity = self.resolver.resolve(caller)?;
        self.allocator
            .reserve(offer.id, &identity.key, identity.public_details)
            .await
    }
}
