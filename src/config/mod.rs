//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, environment overrides, path resolution)
//!     → validation.rs (semantic checks)
//!     → LedgerConfig (validated, immutable)
//!     → threaded through constructors (registries, pool, signers, subscribers)
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup and never mutated afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Key material is never in the file; signers reference environment variables

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AbiSource, ContractsConfig, EventsConfig, FacadeConfig, LedgerConfig, NetworkConfig,
    ObservabilityConfig, RetryConfig, SignerConfig, SubscriptionConfig, TransactionConfig,
};
