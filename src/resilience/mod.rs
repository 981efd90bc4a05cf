//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! RPC call that may fail transiently:
//!     → timeouts.rs (every node round-trip has a deadline)
//!     → On transient failure: retries.rs (exponential backoff with jitter while attempts remain)
//! ```
//!
//! # Design Decisions
//! - Only transport-level failures are retried; RPC error answers and reverts never are
//! - Attempt budgets are small and bounded; the caller sees the last error

pub mod retries;
pub mod timeouts;

pub use retries::{retry_with_backoff, RetryPolicy};
pub use timeouts::with_timeout;
