//! Aid distribution ledger: contract interaction and event sync.
//!
//! Talks JSON-RPC to EVM networks, submits donation and aid transactions with
//! strictly ordered nonces, tracks them to confirmation, and streams contract
//! events into handlers with durable cursors.

pub mod blockchain;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use config::schema::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::LedgerFacade;
pub use lifecycle::Shutdown;
