//! Capacity allocation.
//!
//! `reserve` and `release` each run inside one unit of work on the target
//! offer: eligibility, identity uniqueness and the capacity ceiling are all
//! evaluated against state read under the offer's lock, and the single write
//! is committed before the lock is released. Remaining capacity is always
//! derived from the active record set and never stored.
//!
//! ## Reserve flow
//!
//! 1. lock offer -> 2. validity gate -> 3. identity uniqueness
//!    -> 4. capacity ceiling -> 5. insert + commit

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{IdentityKey, PublicDetails, RedemptionRecord};
use crate::services::validity::ValidityGate;
use crate::store::RedemptionStore;

#[derive(Clone)]
pub struct CapacityAllocator {
    store: Arc<dyn RedemptionStore>,
}

impl CapacityAllocator {
    pub fn new(store: Arc<dyn RedemptionStore>) -> Self {
        Self { store }
    }

    /// Consumes one unit of the offer's capacity for `identity_key`.
    ///
    /// If the caller goes away mid-call the unit of work is dropped and
    /// rolled back, so either the record exists and capacity is consumed or
    /// nothing happened.
    #[instrument(skip(self, identity_key, public_details), fields(identity_kind = ?identity_key.kind()))]
    pub async fn reserve(
        &self,
        offer_id: Uuid,
        identity_key: &IdentityKey,
        public_details: Option<PublicDetails>,
    ) -> Result<RedemptionRecord, EngineError> {
        let mut unit = self
            .store
            .lock_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("offer {offer_id}")))?;

        let now = Utc::now();
        if let Err(reason) = ValidityGate::check(unit.offer(), now) {
            debug!(reason = reason.as_str(), "Offer not eligible");
            return Err(EngineError::OfferNotEligible(reason));
        }

        if unit.find_active(identity_key).await?.is_some() {
            debug!("Identity already holds an active redemption");
            return Err(EngineError::AlreadyRedeemed);
        }

        let active_count = unit.active_count().await?;
        if let Some(capacity) = unit.offer().capacity {
            if active_count >= i64::from(capacity) {
                debug!(capacity, active_count, "Capacity exhausted");
                return Err(EngineError::CapacityExhausted);
            }
        }

        let record = RedemptionRecord::new_active(offer_id, identity_key.clone(), public_details, now);
        unit.insert(&record).await?;
        let remaining = unit.offer().remaining(active_count + 1);
        unit.commit().await?;

        info!(
            redemption_id = %record.id,
            remaining = ?remaining,
            "Redemption reserved"
        );

        Ok(record)
    }

    /// Cancels the identity's active record, freeing one unit.
    ///
    /// Validity is not checked: a reservation can be given back after the
    /// offer closes.
    #[instrument(skip(self, identity_key), fields(identity_kind = ?identity_key.kind()))]
    pub async fn release(
        &self,
        offer_id: Uuid,
        identity_key: &IdentityKey,
    ) -> Result<RedemptionRecord, EngineError> {
        let mut unit = self
            .store
            .lock_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("offer {offer_id}")))?;

        let mut record = unit
            .find_active(identity_key)
            .await?
            .ok_or(EngineError::NoActiveRedemption)?;

        let now = Utc::now();
        unit.cancel(record.id, now).await?;
        unit.commit().await?;
        record.mark_cancelled(now);

        info!(redemption_id = %record.id, "Redemption released");

        Ok(record)
    }
}
