use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

const MEMBER_PREFIX: &str = "member:";
const PUBLIC_PREFIX: &str = "public:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum IdentityKind {
    Member,
    Public,
}

/// Canonical dedup key of a redeeming party: `member:<account id>` or
/// `public:<11 digit cpf>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn member(account_id: Uuid) -> Self {
        Self(format!("{MEMBER_PREFIX}{account_id}"))
    }

    /// Builds a public key from an already normalized CPF. Check digits are
    /// the resolver's job.
    pub(crate) fn public(normalized_cpf: &str) -> Self {
        Self(format!("{PUBLIC_PREFIX}{normalized_cpf}"))
    }

    /// Parses a stored key, checking its shape only
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(account) = raw.strip_prefix(MEMBER_PREFIX) {
            return Uuid::parse_str(account).ok().map(Self::member);
        }
        let cpf = raw.strip_prefix(PUBLIC_PREFIX)?;
        if cpf.len() == 11 && cpf.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn kind(&self) -> IdentityKind {
        if self.0.starts_with(MEMBER_PREFIX) {
            IdentityKind::Member
        } else {
            IdentityKind::Public
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("malformed identity key: {value}"))
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

/// Contact data captured from anonymous callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDetails {
    pub name: String,
    pub cpf: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RedemptionStatus {
    Active,
    Cancelled,
}

/// One unit of an offer's capacity consumed by one identity.
///
/// Created only by `CapacityAllocator::reserve` and moved to `Cancelled`
/// only by `CapacityAllocator::release`; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub id: Uuid,
    pub offer_id: Uuid,
    pub identity_key: IdentityKey,
    pub identity_kind: IdentityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_details: Option<PublicDetails>,
    pub timestamp: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl RedemptionRecord {
    pub fn new_active(
        offer_id: Uuid,
        identity_key: IdentityKey,
        public_details: Option<PublicDetails>,
        now: DateTime<Utc>,
    ) -> Self {
        let identity_kind = identity_key.kind();
        Self {
            id: Uuid::new_v4(),
            offer_id,
            identity_key,
            identity_kind,
            // contact data only makes sense for public callers
            public_details: match identity_kind {
                IdentityKind::Public => public_details,
                IdentityKind::Member => None,
            },
            timestamp: now,
            status: RedemptionStatus::Active,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RedemptionStatus::Active
    }

    pub(crate) fn mark_cancelled(&mut self, at: DateTime<Utc>) {
        self.status = RedemptionStatus::Cancelled;
        self.cancelled_at = Some(at);
    }
}

impl<'r> FromRow<'r, PgRow> for RedemptionRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let name: Option<String> = row.try_get("public_name")?;
        let cpf: Option<String> = row.try_get("public_cpf")?;
        let phone: Option<String> = row.try_get("public_phone")?;

        let public_details = match (name, cpf, phone) {
            (Some(name), Some(cpf), Some(phone)) => Some(PublicDetails { name, cpf, phone }),
            _ => None,
        };

        Ok(Self {
            id: row.try_get("id")?,
            offer_id: row.try_get("offer_id")?,
            identity_key: row.try_get("identity_key")?,
            identity_kind: row.try_get("identity_kind")?,
            public_details,
            timestamp: row.try_get("created_at")?,
            status: row.try_get("status")?,
            cancelled_at: row.try_get("cancelled_at")?,
        })
    }
}

/// Read-side filter for the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedemptionFilter {
    pub offer_id: Option<Uuid>,
    pub status: Option<RedemptionStatus>,
    pub identity_kind: Option<IdentityKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RedemptionFilter {
    pub fn matches(&self, record: &RedemptionRecord) -> bool {
        self.offer_id.map_or(true, |id| record.offer_id == id)
            && self.status.map_or(true, |s| record.status == s)
            && self.identity_kind.map_or(true, |k| record.identity_kind == k)
            && self.since.map_or(true, |since| record.timestamp >= since)
            && self.until.map_or(true, |until| record.timestamp <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_both_shapes() {
        let id = Uuid::new_v4();
        let member = IdentityKey::parse(&format!("member:{id}")).unwrap();
        assert_eq!(member, IdentityKey::member(id));
        assert_eq!(member.kind(), IdentityKind::Member);

        let public = IdentityKey::parse("public:11144477735").unwrap();
        assert_eq!(public.kind(), IdentityKind::Public);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(IdentityKey::parse("public:123").is_none());
        assert!(IdentityKey::parse("public:1114447773a").is_none());
        assert!(IdentityKey::parse("member:not-a-uuid").is_none());
        assert!(IdentityKey::parse("11144477735").is_none());
    }

    #[test]
    fn member_records_drop_contact_data() {
        let details = PublicDetails {
            name: "Ana".to_string(),
            cpf: "11144477735".to_string(),
            phone: "11999998888".to_string(),
        };
        let record = RedemptionRecord::new_active(
            Uuid::new_v4(),
            IdentityKey::member(Uuid::new_v4()),
            Some(details),
            Utc::now(),
        );
        assert!(record.public_details.is_none());
        assert!(record.is_active());
    }
}
