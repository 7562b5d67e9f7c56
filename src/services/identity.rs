use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{IdentityKey, PublicDetails};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdentity {
    #[error("CPF must have 11 digits")]
    MalformedCpf,

    #[error("CPF check digits do not match")]
    CpfChecksum,

    #[error("Name is required")]
    MissingName,

    #[error("Phone must have 10 or 11 digits including area code")]
    MalformedPhone,
}

/// Contact data sent by an anonymous caller, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicCaller {
    pub name: String,
    pub cpf: String,
    pub phone: String,
}

/// Whoever is asking to redeem or enroll
#[derive(Debug, Clone)]
pub enum Caller {
    Member { account_id: Uuid },
    Public(PublicCaller),
}

/// A caller reduced to its dedup key plus any contact data to record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub key: IdentityKey,
    pub public_details: Option<PublicDetails>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, caller: &Caller) -> Result<ResolvedIdentity, InvalidIdentity> {
        match caller {
            Caller::Member { account_id } => Ok(ResolvedIdentity {
                key: IdentityKey::member(*account_id),
                public_details: None,
            }),
            Caller::Public(public) => {
                let name = public.name.trim();
                if name.is_empty() {
                    return Err(InvalidIdentity::MissingName);
                }
                let cpf = normalize_cpf(&public.cpf)?;
                let phone = digits(&public.phone);
                if !(10..=11).contains(&phone.len()) {
                    return Err(InvalidIdentity::MalformedPhone);
                }

                Ok(ResolvedIdentity {
                    key: IdentityKey::public(&cpf),
                    public_details: Some(PublicDetails {
                        name: name.to_string(),
                        cpf,
                        phone,
                    }),
                })
            }
        }
    }

    /// Key for a public caller known only by CPF (cancellations)
    pub fn public_key(&self, cpf: &str) -> Result<IdentityKey, InvalidIdentity> {
        normalize_cpf(cpf).map(|cpf| IdentityKey::public(&cpf))
    }
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Strips formatting and validates both CPF check digits
pub fn normalize_cpf(raw: &str) -> Result<String, InvalidIdentity> {
    let cpf = digits(raw);
    if cpf.len() != 11 {
        return Err(InvalidIdentity::MalformedCpf);
    }

    let nums: Vec<u32> = cpf.bytes().map(|b| u32::from(b - b'0')).collect();
    // repeated digits pass the checksum but are never issued
    if nums.iter().all(|&d| d == nums[0]) {
        return Err(InvalidIdentity::CpfChecksum);
    }

    if check_digit(&nums[..9]) != nums[9] || check_digit(&nums[..10]) != nums[10] {
        return Err(InvalidIdentity::CpfChecksum);
    }

    Ok(cpf)
}

/// Weighted sum with weights from `len + 1` down to 2, remainder-11 rule
fn check_digit(prefix: &[u32]) -> u32 {
    let weight_start = prefix.len() as u32 + 1;
    let sum: u32 = prefix
        .iter()
        .enumerate()
        .map(|(i, d)| d * (weight_start - i as u32))
        .sum();

    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityKind;

    fn public(cpf: &str) -> Caller {
        Caller::Public(PublicCaller {
            name: "Maria Silva".to_string(),
            cpf: cpf.to_string(),
            phone: "(11) 98765-4321".to_string(),
        })
    }

    #[test]
    fn accepts_valid_cpfs_in_any_format() {
        assert_eq!(normalize_cpf("111.444.777-35").unwrap(), "11144477735");
        assert_eq!(normalize_cpf("12345678909").unwrap(), "12345678909");
        assert_eq!(normalize_cpf(" 529.982.247-25 ").unwrap(), "52998224725");
    }

    #[test]
    fn rejects_bad_check_digits() {
        assert_eq!(normalize_cpf("111.444.777-36"), Err(InvalidIdentity::CpfChecksum));
        assert_eq!(normalize_cpf("12345678900"), Err(InvalidIdentity::CpfChecksum));
    }

    #[test]
    fn rejects_wrong_length_and_repeated_digits() {
        assert_eq!(normalize_cpf("1234567890"), Err(InvalidIdentity::MalformedCpf));
        assert_eq!(normalize_cpf(""), Err(InvalidIdentity::MalformedCpf));
        assert_eq!(normalize_cpf("111.111.111-11"), Err(InvalidIdentity::CpfChecksum));
    }

    #[test]
    fn check_digit_uses_zero_below_two() {
        // 1,2,3,4,5,6,7,8,9 sums to 210, remainder 1
        assert_eq!(check_digit(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), 0);
    }

    #[test]
    fn public_caller_resolves_to_cpf_key() {
        let resolved = IdentityResolver::new().resolve(&public("111.444.777-35")).unwrap();
        assert_eq!(resolved.key.as_str(), "public:11144477735");
        assert_eq!(resolved.key.kind(), IdentityKind::Public);

        let details = resolved.public_details.unwrap();
        assert_eq!(details.cpf, "11144477735");
        assert_eq!(details.phone, "11987654321");
    }

    #[test]
    fn member_caller_resolves_to_account_key() {
        let account_id = Uuid::new_v4();
        let resolved = IdentityResolver::new()
            .resolve(&Caller::Member { account_id })
            .unwrap();
        assert_eq!(resolved.key.as_str(), format!("member:{account_id}"));
        assert!(resolved.public_details.is_none());
    }

    #[test]
    fn public_caller_needs_name_and_phone() {
        let resolver = IdentityResolver::new();
        let nameless = Caller::Public(PublicCaller {
            name: "  ".to_string(),
            cpf: "11144477735".to_string(),
            phone: "11987654321".to_string(),
        });
        assert_eq!(resolver.resolve(&nameless), Err(InvalidIdentity::MissingName));

        let no_phone = Caller::Public(PublicCaller {
            name: "Joao".to_string(),
            cpf: "11144477735".to_string(),
            phone: "123".to_string(),
        });
        assert_eq!(resolver.resolve(&no_phone), Err(InvalidIdentity::MalformedPhone));
    }
}
