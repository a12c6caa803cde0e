//! The side the reconciler commits to once a pointer flips; intentionally
//! undeveloped beyond the interface and a no-op test double.

use crate::error::Result;
use crate::identity::PartitionKey;
use async_trait::async_trait;

#[async_trait]
pub trait CuratedSink: Send + Sync {
    async fn stage(&self, partition_key: &PartitionKey, run_id: &str) -> Result<()>;
}

pub struct NullCuratedSink;

#[async_trait]
impl CuratedSink for NullCuratedSink {
    async fn stage(&self, _partition_key: &PartitionKey, _run_id: &str) -> Result<()> {
        Ok(())
    }
}
