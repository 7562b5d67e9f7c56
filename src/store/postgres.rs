//! PostgreSQL store.
//!
//! The unit of work is a transaction holding `FOR UPDATE` on the offer row,
//! so reservations on one offer are serialized while other offers proceed.
//! The partial unique index `redemptions_active_identity_key` backs the
//! one-active-record-per-identity rule at the storage level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{OfferUnitOfWork, RedemptionStore, StoreError, StoreResult};
use crate::models::{IdentityKey, Offer, RedemptionFilter, RedemptionRecord};

const UNIQUE_VIOLATION: &str = "23505";
const ACTIVE_IDENTITY_INDEX: &str = "redemptions_active_identity_key";
const ACTIVE_CODE_INDEX: &str = "offers_active_benefit_code_key";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Name of the unique index a statement tripped over, if any
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn map_offer_write(err: sqlx::Error, offer: &Offer) -> StoreError {
    match unique_violation(&err) {
        Some(index) if index == ACTIVE_CODE_INDEX => {
            StoreError::CodeTaken(offer.code.clone().unwrap_or_default())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl RedemptionStore for PgStore {
    async fn get_offer(&self, id: Uuid) -> StoreResult<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(
            r#"
            SELECT * FROM offers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn get_offer_by_code(&self, code: &str) -> StoreResult<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(
            r#"
            SELECT * FROM offers
            WHERE code = $1 AND kind = 'benefit'
            ORDER BY active DESC, updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn insert_offer(&self, offer: &Offer) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO offers (id, kind, code, title, capacity, valid_from, valid_until,
                                active, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(offer.id)
        .bind(offer.kind)
        .bind(&offer.code)
        .bind(&offer.title)
        .bind(offer.capacity)
        .bind(offer.valid_from)
        .bind(offer.valid_until)
        .bind(offer.active)
        .bind(offer.owner_id)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_offer_write(e, offer))?;

        Ok(())
    }

    async fn lock_offer(&self, id: Uuid) -> StoreResult<Option<Box<dyn OfferUnitOfWork>>> {
        let mut tx = self.pool.begin().await?;

        let offer = sqlx::query_as::<_, Offer>(
            r#"
            SELECT * FROM offers WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        // an unknown offer just lets the transaction roll back on drop
        Ok(offer.map(|offer| Box::new(PgUnitOfWork { tx, offer }) as Box<dyn OfferUnitOfWork>))
    }

    async fn list_by_offer(&self, offer_id: Uuid) -> StoreResult<Vec<RedemptionRecord>> {
        let records = sqlx::query_as::<_, RedemptionRecord>(
            r#"
            SELECT * FROM redemptions
            WHERE offer_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(offer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_redemptions(&self, filter: &RedemptionFilter) -> StoreResult<Vec<RedemptionRecord>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM redemptions WHERE TRUE");

        if let Some(offer_id) = filter.offer_id {
            query.push(" AND offer_id = ").push_bind(offer_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(kind) = filter.identity_kind {
            query.push(" AND identity_kind = ").push_bind(kind);
        }
        if let Some(since) = filter.since {
            query.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            query.push(" AND created_at <= ").push_bind(until);
        }
        query.push(" ORDER BY created_at ASC, id ASC");

        let records = query
            .build_query_as::<RedemptionRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn get_redemption(&self, id: Uuid) -> StoreResult<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(
            r#"
            SELECT * FROM redemptions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn count_active(&self, offer_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM redemptions
            WHERE offer_id = $1 AND status = 'active'
            "#,
        )
        .bind(offer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    offer: Offer,
}

#[async_trait]
impl OfferUnitOfWork for PgUnitOfWork {
    fn offer(&self) -> &Offer {
        &self.offer
    }

    async fn active_count(&mut self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM redemptions
            WHERE offer_id = $1 AND status = 'active'
            "#,
        )
        .bind(self.offer.id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn find_active(&mut self, identity_key: &IdentityKey) -> StoreResult<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(
            r#"
            SELECT * FROM redemptions
            WHERE offer_id = $1 AND identity_key = $2 AND status = 'active'
            "#,
        )
        .bind(self.offer.id)
        .bind(identity_key)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn insert(&mut self, record: &RedemptionRecord) -> StoreResult<()> {
        let details = record.public_details.as_ref();

        sqlx::query(
            r#"
            INSERT INTO redemptions (id, offer_id, identity_key, identity_kind,
                                     public_name, public_cpf, public_phone,
                                     status, created_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.offer_id)
        .bind(&record.identity_key)
        .bind(record.identity_kind)
        .bind(details.map(|d| d.name.as_str()))
        .bind(details.map(|d| d.cpf.as_str()))
        .bind(details.map(|d| d.phone.as_str()))
        .bind(record.status)
        .bind(record.timestamp)
        .bind(record.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(index) if index == ACTIVE_IDENTITY_INDEX => StoreError::DuplicateActive,
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn cancel(&mut self, record_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE redemptions
            SET status = 'cancelled', cancelled_at = $2
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(record_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE offers
            SET title = $2, capacity = $3, valid_from = $4, valid_until = $5,
                active = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(offer.id)
        .bind(&offer.title)
        .bind(offer.capacity)
        .bind(offer.valid_from)
        .bind(offer.valid_until)
        .bind(offer.active)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_offer_write(e, offer))?;

        self.offer = offer.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
