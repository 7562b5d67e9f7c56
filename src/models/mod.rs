// Models module - Entity representations

pub mod offer;
pub mod redemption;

pub use offer::{normalize_code, Availability, NewOffer, Offer, OfferKind, OfferUpdate};
pub use redemption::{
    IdentityKey, IdentityKind, PublicDetails, RedemptionFilter, RedemptionRecord, RedemptionStatus,
};
