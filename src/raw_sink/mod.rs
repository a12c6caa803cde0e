//! Write-once raw partition storage: the `RawSink` capability set and its backends.

mod factory;
mod local;
mod object;

pub use factory::create_raw_sink;
pub use local::LocalFilesystemRawSink;
pub use object::{ObjectStoreConfig, ObjectStoreRawSink};

use crate::error::Result;
use crate::identity::PartitionKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata written exactly once, after the payload is durable. Its presence is the
/// sole finalization indicator for a `(PartitionKey, run_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub source: String,
    pub customer_id: String,
    pub query_name: String,
    pub logical_date: String,
    pub run_id: String,
    pub extracted_at: String,
    pub schema_version: String,
    pub record_count: u64,
    pub api_version: String,
    pub query_signature: String,
}

/// Backend used by extractors/validators to interact with raw storage.
#[async_trait]
pub trait RawSink: Send + Sync {
    async fn write_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionWriter>>;

    async fn open_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionReader>>;

    async fn list_partitions(&self, key: &PartitionKey) -> Result<Vec<String>>;
}

/// Mutable handle for writing exactly one raw partition.
#[async_trait]
pub trait PartitionWriter: Send {
    async fn append_payload_row(&mut self, row: &Value) -> Result<()>;
    async fn finalize(&mut self, metadata: RunMetadata) -> Result<()>;
}

/// Read-only handle for an immutable raw partition.
#[async_trait]
pub trait PartitionReader: Send {
    async fn iter_payload_rows(&self) -> Result<Vec<Value>>;
    async fn read_metadata(&self) -> Result<RunMetadata>;
}

/// Canonical path/key fragments shared by every backend:
/// `<source>/customer_id=<cid>/query_name=<qn>/logical_date=<date>/run_id=<rid>/...`
pub(crate) fn logical_segments(key: &PartitionKey) -> Vec<String> {
    vec![
        key.source.clone(),
        format!("customer_id={}", key.customer_id),
        format!("query_name={}", key.query_name),
        format!("logical_date={}", key.logical_date),
    ]
}

pub(crate) fn partition_segments(key: &PartitionKey, run_id: &str) -> Vec<String> {
    let mut segments = logical_segments(key);
    segments.push(format!("run_id={run_id}"));
    segments
}
