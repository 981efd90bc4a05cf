//! Domain layer over the aid distribution contract.
//!
//! # Data Flow
//! ```text
//! caller → facade.rs (LedgerFacade) → blockchain/* (submit, await, call)
//!                                   → events/*     (subscribe)
//! events → projection.rs (DonorLedger, AidRegistry) → models.rs views
//! ```

pub mod facade;
pub mod models;
pub mod projection;

pub use facade::{LedgerComponents, LedgerFacade};
pub use models::{ether, AidRecord, AidStatus, AidSubmission, Donation, WriteOptions};
pub use projection::{AidRegistry, DonorLedger, Projections};
