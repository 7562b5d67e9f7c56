//! In-process store.
//!
//! Each offer has a writer lock, held by its unit of work, and a committed
//! snapshot behind a short synchronous lock. Readers clone the snapshot and
//! never wait on an in-flight unit of work, and work on one offer never
//! waits on another. Benefit codes are indexed separately.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OfferUnitOfWork, RedemptionStore, StoreError, StoreResult};
use crate::models::{IdentityKey, Offer, OfferKind, RedemptionFilter, RedemptionRecord};

/// Committed state of one offer
#[derive(Debug, Clone)]
struct SlotState {
    offer: Offer,
    records: Vec<RedemptionRecord>,
    by_id: HashMap<Uuid, usize>,
    /// identity -> id of its active record
    active: HashMap<IdentityKey, Uuid>,
}

impl SlotState {
    fn record(&self, id: Uuid) -> Option<&RedemptionRecord> {
        self.by_id.get(&id).map(|&idx| &self.records[idx])
    }
}

#[derive(Debug)]
struct OfferSlot {
    writer: Arc<Mutex<()>>,
    committed: RwLock<Arc<SlotState>>,
}

impl OfferSlot {
    fn new(offer: Offer) -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            committed: RwLock::new(Arc::new(SlotState {
                offer,
                records: Vec::new(),
                by_id: HashMap::new(),
                active: HashMap::new(),
            })),
        }
    }

    fn snapshot(&self) -> Arc<SlotState> {
        Arc::clone(&self.committed.read())
    }
}

#[derive(Debug, Default)]
struct Inner {
    slots: DashMap<Uuid, Arc<OfferSlot>>,
    /// active benefit code -> offer id
    codes: DashMap<String, Uuid>,
    /// benefit code -> offer written last under it, active or not
    latest_codes: DashMap<String, Uuid>,
    /// redemption id -> offer id
    redemption_offers: DashMap<Uuid, Uuid>,
}

/// Store backed by process memory; state is lost on restart
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Option<Arc<OfferSlot>> {
        // clone the Arc so no map guard outlives the call
        self.inner.slots.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self, id: Uuid) -> Option<Arc<SlotState>> {
        self.slot(id).map(|slot| slot.snapshot())
    }
}

fn claims_code(offer: &Offer) -> Option<&str> {
    match (offer.kind, offer.active, offer.code.as_deref()) {
        (OfferKind::Benefit, true, Some(code)) => Some(code),
        _ => None,
    }
}

fn benefit_code(offer: &Offer) -> Option<&str> {
    match offer.kind {
        OfferKind::Benefit => offer.code.as_deref(),
        _ => None,
    }
}

#[async_trait]
impl RedemptionStore for MemoryStore {
    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<Offer>> {
        Ok(self.snapshot(id).map(|state| state.offer.clone()))
    }

    async fn get_offer_by_code(&self, code: &str) -> StoreResult<Option<Offer>> {
        let id = self
            .inner
            .codes
            .get(code)
            .map(|entry| *entry.value())
            .or_else(|| self.inner.latest_codes.get(code).map(|entry| *entry.value()));

        Ok(id.and_then(|id| self.snapshot(id)).map(|state| state.offer.clone()))
    }

    async fn insert_offer(&self, offer: &Offer) -> StoreResult<()> {
        if let Some(code) = claims_code(offer) {
            match self.inner.codes.entry(code.to_string()) {
                Entry::Occupied(_) => return Err(StoreError::CodeTaken(code.to_string())),
                Entry::Vacant(vacant) => {
                    vacant.insert(offer.id);
                }
            }
        }

        self.inner
            .slots
            .insert(offer.id, Arc::new(OfferSlot::new(offer.clone())));
        if let Some(code) = benefit_code(offer) {
            self.inner.latest_codes.insert(code.to_string(), offer.id);
        }
        Ok(())
    }

    async fn lock_offer(&self, id: Uuid) -> StoreResult<Option<Box<dyn OfferUnitOfWork>>> {
        let Some(slot) = self.slot(id) else {
            return Ok(None);
        };
        let writer = Arc::clone(&slot.writer).lock_owned().await;
        // only a unit holding `writer` replaces the snapshot
        let offer = slot.snapshot().offer.clone();

        Ok(Some(Box::new(MemoryUnitOfWork {
            _writer: writer,
            slot,
            offer,
            offer_dirty: false,
            inserts: Vec::new(),
            cancels: Vec::new(),
            inner: Arc::clone(&self.inner),
        })))
    }

    async fn list_by_offer(&self, offer_id: Uuid) -> StoreResult<Vec<RedemptionRecord>> {
        Ok(self
            .snapshot(offer_id)
            .map(|state| state.records.clone())
            .unwrap_or_default())
    }

    async fn list_redemptions(&self, filter: &RedemptionFilter) -> StoreResult<Vec<RedemptionRecord>> {
        let snapshots: Vec<Arc<SlotState>> = match filter.offer_id {
            Some(offer_id) => self.snapshot(offer_id).into_iter().collect(),
            None => self
                .inner
                .slots
                .iter()
                .map(|entry| entry.value().snapshot())
                .collect(),
        };

        let mut records: Vec<RedemptionRecord> = snapshots
            .iter()
            .flat_map(|state| state.records.iter().filter(|r| filter.matches(r)).cloned())
            .collect();
        records.sort_by_key(|r| (r.timestamp, r.id));
        Ok(records)
    }

    async fn get_redemption(&self, id: Uuid) -> StoreResult<Option<RedemptionRecord>> {
        let offer_id = match self.inner.redemption_offers.get(&id) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self
            .snapshot(offer_id)
            .and_then(|state| state.record(id).cloned()))
    }

    async fn count_active(&self, offer_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .snapshot(offer_id)
            .map_or(0, |state| state.active.len() as i64))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Holds the offer's writer lock; writes are staged and only applied on
/// commit
struct MemoryUnitOfWork {
    _writer: OwnedMutexGuard<()>,
    slot: Arc<OfferSlot>,
    offer: Offer,
    offer_dirty: bool,
    inserts: Vec<RedemptionRecord>,
    cancels: Vec<(Uuid, DateTime<Utc>)>,
    inner: Arc<Inner>,
}

impl MemoryUnitOfWork {
    fn is_staged_cancel(&self, id: Uuid) -> bool {
        self.cancels.iter().any(|(cancelled, _)| *cancelled == id)
    }

    fn lookup_active(&self, identity_key: &IdentityKey) -> Option<RedemptionRecord> {
        if let Some(staged) = self
            .inserts
            .iter()
            .find(|r| r.is_active() && &r.identity_key == identity_key)
        {
            return Some(staged.clone());
        }

        let committed = self.slot.snapshot();
        let id = *committed.active.get(identity_key)?;
        if self.is_staged_cancel(id) {
            return None;
        }
        committed.record(id).cloned()
    }

    fn sync_code_index(&self) -> StoreResult<()> {
        let committed = self.slot.snapshot();
        let previous = &committed.offer;
        if claims_code(previous) == claims_code(&self.offer) {
            return Ok(());
        }

        if let Some(code) = claims_code(&self.offer) {
            match self.inner.codes.entry(code.to_string()) {
                Entry::Occupied(occupied) if *occupied.get() != self.offer.id => {
                    return Err(StoreError::CodeTaken(code.to_string()));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(vacant) => {
                    vacant.insert(self.offer.id);
                }
            }
        }
        if let Some(code) = claims_code(previous) {
            self.inner
                .codes
                .remove_if(code, |_, owner| *owner == self.offer.id);
        }
        Ok(())
    }
}

#[async_trait]
impl OfferUnitOfWork for MemoryUnitOfWork {
    fn offer(&self) -> &Offer {
        &self.offer
    }

    async fn active_count(&mut self) -> StoreResult<i64> {
        let committed = self.slot.snapshot().active.len() - self.cancels.len();
        let staged = self.inserts.iter().filter(|r| r.is_active()).count();
        Ok((committed + staged) as i64)
    }

    async fn find_active(&mut self, identity_key: &IdentityKey) -> StoreResult<Option<RedemptionRecord>> {
        Ok(self.lookup_active(identity_key))
    }

    async fn insert(&mut self, record: &RedemptionRecord) -> StoreResult<()> {
        if record.is_active() && self.lookup_active(&record.identity_key).is_some() {
            return Err(StoreError::DuplicateActive);
        }
        self.inserts.push(record.clone());
        Ok(())
    }

    async fn cancel(&mut self, record_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(staged) = self.inserts.iter_mut().find(|r| r.id == record_id) {
            if staged.is_active() {
                staged.mark_cancelled(at);
            }
            return Ok(());
        }

        let committed_active = self
            .slot
            .snapshot()
            .record(record_id)
            .is_some_and(|r| r.is_active());
        if committed_active && !self.is_staged_cancel(record_id) {
            self.cancels.push((record_id, at));
        }
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        self.offer = offer.clone();
        self.offer_dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        if this.offer_dirty {
            this.sync_code_index()?;
            if let Some(code) = benefit_code(&this.offer) {
                this.inner.latest_codes.insert(code.to_string(), this.offer.id);
            }
        }

        let cancels = std::mem::take(&mut this.cancels);
        let inserts = std::mem::take(&mut this.inserts);

        let mut committed = this.slot.committed.write();
        // copies only when a reader still holds the previous snapshot
        let state = Arc::make_mut(&mut committed);
        if this.offer_dirty {
            state.offer = this.offer.clone();
        }

        for (id, at) in cancels {
            if let Some(&idx) = state.by_id.get(&id) {
                let record = &mut state.records[idx];
                record.mark_cancelled(at);
                state.active.remove(&record.identity_key);
            }
        }

        for record in inserts {
            let idx = state.records.len();
            state.by_id.insert(record.id, idx);
            if record.is_active() {
                state.active.insert(record.identity_key.clone(), record.id);
            }
            this.inner.redemption_offers.insert(record.id, record.offer_id);
            state.records.push(record);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOffer, OfferUpdate};

    fn benefit(code: &str) -> Offer {
        Offer::from_new(
            NewOffer {
                kind: OfferKind::Benefit,
                code: Some(code.to_string()),
                title: "Discount".to_string(),
                capacity: Some(2),
                valid_from: None,
                valid_until: None,
                active: true,
                owner_id: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        let offer = benefit("DROP10");
        store.insert_offer(&offer).await.unwrap();

        let key = IdentityKey::member(Uuid::new_v4());
        {
            let mut unit = store.lock_offer(offer.id).await.unwrap().unwrap();
            let record = RedemptionRecord::new_active(offer.id, key.clone(), None, Utc::now());
            unit.insert(&record).await.unwrap();
            assert_eq!(unit.active_count().await.unwrap(), 1);
            // dropped without commit
        }

        assert_eq!(store.count_active(offer.id).await.unwrap(), 0);
        assert!(store.list_by_offer(offer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_inserts_and_cancels() {
        let store = MemoryStore::new();
        let offer = benefit("COMMIT10");
        store.insert_offer(&offer).await.unwrap();
        let key = IdentityKey::member(Uuid::new_v4());

        let record = RedemptionRecord::new_active(offer.id, key.clone(), None, Utc::now());
        let mut unit = store.lock_offer(offer.id).await.unwrap().unwrap();
        unit.insert(&record).await.unwrap();
        assert!(matches!(
            unit.insert(&record).await,
            Err(StoreError::DuplicateActive)
        ));
        unit.commit().await.unwrap();
        assert_eq!(store.count_active(offer.id).await.unwrap(), 1);

        let mut unit = store.lock_offer(offer.id).await.unwrap().unwrap();
        let found = unit.find_active(&key).await.unwrap().unwrap();
        unit.cancel(found.id, Utc::now()).await.unwrap();
        assert_eq!(unit.active_count().await.unwrap(), 0);
        assert!(unit.find_active(&key).await.unwrap().is_none());
        unit.commit().await.unwrap();

        let stored = store.get_redemption(record.id).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert!(stored.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn active_benefit_codes_are_unique() {
        let store = MemoryStore::new();
        store.insert_offer(&benefit("SAME")).await.unwrap();
        assert!(matches!(
            store.insert_offer(&benefit("SAME")).await,
            Err(StoreError::CodeTaken(_))
        ));

        let mut inactive = benefit("SAME");
        inactive.active = false;
        store.insert_offer(&inactive).await.unwrap();

        // reactivating would collide with the live one
        let mut unit = store.lock_offer(inactive.id).await.unwrap().unwrap();
        let mut reactivated = inactive.clone();
        reactivated.apply(
            OfferUpdate {
                active: Some(true),
                ..Default::default()
            },
            Utc::now(),
        );
        unit.update_offer(&reactivated).await.unwrap();
        assert!(matches!(unit.commit().await, Err(StoreError::CodeTaken(_))));
    }

    #[tokio::test]
    async fn deactivation_frees_the_code() {
        let store = MemoryStore::new();
        let offer = benefit("FREE");
        store.insert_offer(&offer).await.unwrap();

        let mut unit = store.lock_offer(offer.id).await.unwrap().unwrap();
        let mut closed = offer.clone();
        closed.active = false;
        unit.update_offer(&closed).await.unwrap();
        unit.commit().await.unwrap();

        // a closed code still resolves, so callers can tell it apart from
        // an unknown one
        let found = store.get_offer_by_code("FREE").await.unwrap().unwrap();
        assert_eq!(found.id, offer.id);
        assert!(!found.active);

        let replacement = benefit("FREE");
        store.insert_offer(&replacement).await.unwrap();
        let found = store.get_offer_by_code("FREE").await.unwrap().unwrap();
        assert_eq!(found.id, replacement.id);
        assert!(found.active);
    }

    #[tokio::test]
    async fn unknown_code_resolves_to_nothing() {
        let store = MemoryStore::new();
        store.insert_offer(&benefit("KNOWN")).await.unwrap();
        assert!(store.get_offer_by_code("OTHER").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_see_committed_state_while_a_unit_is_open() {
        let store = MemoryStore::new();
        let offer = benefit("READS");
        store.insert_offer(&offer).await.unwrap();

        let mut unit = store.lock_offer(offer.id).await.unwrap().unwrap();
        let record = RedemptionRecord::new_active(
            offer.id,
            IdentityKey::member(Uuid::new_v4()),
            None,
            Utc::now(),
        );
        unit.insert(&record).await.unwrap();

        // none of these wait on the open unit, and none see its staged write
        assert_eq!(store.get_offer(offer.id).await.unwrap().unwrap().id, offer.id);
        assert_eq!(store.count_active(offer.id).await.unwrap(), 0);
        assert!(store.list_by_offer(offer.id).await.unwrap().is_empty());

        unit.commit().await.unwrap();
        assert_eq!(store.count_active(offer.id).await.unwrap(), 1);
        assert_eq!(store.get_redemption(record.id).await.unwrap().unwrap().id, record.id);
    }
}
