//! Persistence for offers and redemption records.
//!
//! All writes to the redemption set go through an [`OfferUnitOfWork`], which
//! holds the offer's exclusive lock until it is committed or dropped.
//! Dropping a unit of work without committing discards every staged write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{IdentityKey, Offer, RedemptionFilter, RedemptionRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Active redemption already exists for this identity")]
    DuplicateActive,

    #[error("Offer code already in use: {0}")]
    CodeTaken(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Offer and redemption persistence shared by every engine component
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<Offer>>;

    /// Looks up a benefit by its already upper-cased code. The active
    /// holder of the code wins; otherwise the most recently updated
    /// inactive benefit that used it, so a closed code is not reported as
    /// unknown.
    async fn get_offer_by_code(&self, code: &str) -> StoreResult<Option<Offer>>;

    /// Persists a new offer. Fails with `CodeTaken` when another active
    /// benefit already uses the same code.
    async fn insert_offer(&self, offer: &Offer) -> StoreResult<()>;

    /// Opens the atomic unit of work for one offer. Returns `None` when the
    /// offer does not exist.
    async fn lock_offer(&self, id: Uuid) -> StoreResult<Option<Box<dyn OfferUnitOfWork>>>;

    async fn list_by_offer(&self, offer_id: Uuid) -> StoreResult<Vec<RedemptionRecord>>;

    async fn list_redemptions(&self, filter: &RedemptionFilter) -> StoreResult<Vec<RedemptionRecord>>;

    async fn get_redemption(&self, id: Uuid) -> StoreResult<Option<RedemptionRecord>>;

    async fn count_active(&self, offer_id: Uuid) -> StoreResult<i64>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Exclusive view of one offer and its redemptions.
///
/// Reads reflect writes staged earlier in the same unit.
#[async_trait]
pub trait OfferUnitOfWork: Send {
    /// Offer state read under the lock
    fn offer(&self) -> &Offer;

    async fn active_count(&mut self) -> StoreResult<i64>;

    async fn find_active(&mut self, identity_key: &IdentityKey) -> StoreResult<Option<RedemptionRecord>>;

    async fn insert(&mut self, record: &RedemptionRecord) -> StoreResult<()>;

    async fn cancel(&mut self, record_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Replaces the offer row (owner edits)
    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
