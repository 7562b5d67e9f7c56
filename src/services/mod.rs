// Services module - Redemption engine

pub mod allocator;
pub mod catalog;
pub mod engine;
pub mod identity;
pub mod ledger;
pub mod validity;

pub use allocator::CapacityAllocator;
pub use catalog::OfferCatalog;
pub use engine::RedemptionEngine;
pub use identity::{Caller, IdentityResolver, PublicCaller};
pub use ledger::RedemptionLedger;
pub use validity::{IneligibleReason, ValidityGate};
