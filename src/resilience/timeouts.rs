//! Timeout enforcement.
//!
//! Wraps node round-trips with a deadline; an elapsed deadline becomes
//! [`BlockchainError::Timeout`], distinct from transport errors.

use std::future::Future;
use std::time::Duration;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Await `fut` for at most `duration`.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> BlockchainResult<T>
where
    F: Future<Output = BlockchainResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(BlockchainError::Timeout(duration.as_secs())),
    }
}
