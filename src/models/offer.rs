use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What an offer grants once redeemed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OfferKind {
    /// Discount code, looked up by `code`
    Benefit,
    Training,
    Event,
}

impl OfferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferKind::Benefit => "benefit",
            OfferKind::Training => "training",
            OfferKind::Event => "event",
        }
    }
}

impl std::fmt::Display for OfferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Offer {
    pub id: Uuid,
    pub kind: OfferKind,
    pub code: Option<String>, // benefits only, stored upper-cased
    pub title: String,
    pub capacity: Option<i32>, // None = unlimited
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
    pub owner_id: Option<Uuid>, // None = the association itself
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    pub kind: OfferKind,
    pub code: Option<String>,
    pub title: String,
    pub capacity: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub owner_id: Option<Uuid>,
}

fn default_active() -> bool {
    true
}

/// Partial edit of an offer. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferUpdate {
    pub title: Option<String>,
    #[serde(default, with = "double_option")]
    pub capacity: Option<Option<i32>>,
    #[serde(default, with = "double_option")]
    pub valid_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub active: Option<bool>,
}

impl Offer {
    /// Builds a fresh offer record from validated input
    pub fn from_new(data: NewOffer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: data.kind,
            code: data.code.map(|c| normalize_code(&c)),
            title: data.title.trim().to_string(),
            capacity: data.capacity,
            valid_from: data.valid_from,
            valid_until: data.valid_until,
            active: data.active,
            owner_id: data.owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an edit in place. Capacity is never touched by the allocator,
    /// only here.
    pub fn apply(&mut self, update: OfferUpdate, now: DateTime<Utc>) {
        if let Some(title) = update.title {
            self.title = title.trim().to_string();
        }
        if let Some(capacity) = update.capacity {
            self.capacity = capacity;
        }
        if let Some(valid_from) = update.valid_from {
            self.valid_from = valid_from;
        }
        if let Some(valid_until) = update.valid_until {
            self.valid_until = valid_until;
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        self.updated_at = now;
    }

    /// Remaining units given the current active count, `None` when unlimited
    pub fn remaining(&self, active_count: i64) -> Option<i64> {
        self.capacity
            .map(|capacity| (i64::from(capacity) - active_count).max(0))
    }
}

/// Benefit codes are matched case-insensitively by upper-casing both sides
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Derived availability of an offer, computed from the active record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub capacity: Option<i32>,
    pub active_count: i64,
    pub remaining: Option<i64>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(capacity: Option<i32>) -> Offer {
        Offer::from_new(
            NewOffer {
                kind: OfferKind::Training,
                code: None,
                title: "Workshop".to_string(),
                capacity,
                valid_from: None,
                valid_until: None,
                active: true,
                owner_id: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn remaining_is_derived_and_never_negative() {
        assert_eq!(offer(Some(3)).remaining(1), Some(2));
        assert_eq!(offer(Some(3)).remaining(5), Some(0));
        assert_eq!(offer(None).remaining(100), None);
    }

    #[test]
    fn update_distinguishes_clear_from_absent() {
        let mut o = offer(Some(3));
        let update: OfferUpdate = serde_json::from_str(r#"{"capacity": null}"#).unwrap();
        o.apply(update, Utc::now());
        assert_eq!(o.capacity, None);

        let mut o = offer(Some(3));
        let update: OfferUpdate = serde_json::from_str(r#"{"title": "Other"}"#).unwrap();
        o.apply(update, Utc::now());
        assert_eq!(o.capacity, Some(3));
        assert_eq!(o.title, "Other");
    }

    #[test]
    fn codes_are_upper_cased() {
        assert_eq!(normalize_code(" promo10 "), "PROMO10");
    }
}
