//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (human-readable or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, binary only)
//! ```
//!
//! # Design Decisions
//! - Structured fields (network, tx_hash, nonce, block) on every ledger log line
//! - Metrics are cheap facade calls; without an installed recorder they are no-ops
//! - Key material and RPC credentials are never logged

pub mod logging;
pub mod metrics;
