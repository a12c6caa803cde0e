//! Object-storage-backed `RawSink` implementation (S3-compatible, e.g. MinIO).

use super::{logical_segments, partition_segments, PartitionReader, PartitionWriter, RawSink, RunMetadata};
use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn object_prefix(prefix: &str, key: &PartitionKey) -> String {
    let mut parts: Vec<String> = prefix
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    parts.extend(logical_segments(key));
    parts.join("/")
}

fn object_key(prefix: &str, run_id: &str, filename: &str) -> ObjectPath {
    ObjectPath::from(format!("{prefix}/run_id={run_id}/{filename}"))
}

pub struct ObjectStoreRawSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreRawSink {
    pub fn new(config: ObjectStoreConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key) = &config.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        let store = builder
            .build()
            .map_err(|e| PipelineError::Config(format!("invalid object store config: {e}")))?;
        Ok(Self {
            store: Arc::new(store),
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    async fn object_exists(&self, path: &ObjectPath) -> Result<bool> {
        match self.store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(PipelineError::ObjectStore(e)),
        }
    }
}

#[async_trait]
impl RawSink for ObjectStoreRawSink {
    async fn write_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionWriter>> {
        let prefix = object_prefix(&self.prefix, key);
        let metadata_key = object_key(&prefix, run_id, "metadata.json");
        if self.object_exists(&metadata_key).await? {
            return Err(PipelineError::AlreadyFinalized(format!(
                "{key} run_id={run_id}"
            )));
        }
        let payload_key = object_key(&prefix, run_id, "payload.jsonl");
        Ok(Box::new(ObjectPartitionWriter {
            store: Arc::clone(&self.store),
            payload_key,
            metadata_key,
            scratch: Vec::new(),
            finalized: false,
        }))
    }

    async fn open_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionReader>> {
        let prefix = object_prefix(&self.prefix, key);
        let metadata_key = object_key(&prefix, run_id, "metadata.json");
        if !self.object_exists(&metadata_key).await? {
            return Err(PipelineError::NotFound(format!(
                "{key} run_id={run_id} (metadata missing, not finalized)"
            )));
        }
        let payload_key = object_key(&prefix, run_id, "payload.jsonl");
        Ok(Box::new(ObjectPartitionReader {
            store: Arc::clone(&self.store),
            payload_key,
            metadata_key,
        }))
    }

    async fn list_partitions(&self, key: &PartitionKey) -> Result<Vec<String>> {
        let prefix = object_prefix(&self.prefix, key);
        let logical_prefix = ObjectPath::from(prefix);
        let listing = self
            .store
            .list_with_delimiter(Some(&logical_prefix))
            .await?;
        let mut run_ids = std::collections::BTreeSet::new();
        for common_prefix in listing.common_prefixes {
            let part = common_prefix.as_ref().trim_end_matches('/');
            if let Some(run_id) = part.rsplit('/').next().and_then(|s| s.strip_prefix("run_id=")) {
                run_ids.insert(run_id.to_string());
            }
        }
        Ok(run_ids.into_iter().collect())
    }
}

struct ObjectPartitionWriter {
    store: Arc<dyn ObjectStore>,
    payload_key: ObjectPath,
    metadata_key: ObjectPath,
    scratch: Vec<u8>,
    finalized: bool,
}

#[async_trait]
impl PartitionWriter for ObjectPartitionWriter {
    async fn append_payload_row(&mut self, row: &Value) -> Result<()> {
        if self.finalized {
            return Err(PipelineError::AlreadyFinalized(self.payload_key.to_string()));
        }
        serde_json::to_writer(&mut self.scratch, row)?;
        self.scratch.push(b'\n');
        Ok(())
    }

    async fn finalize(&mut self, metadata: RunMetadata) -> Result<()> {
        if self.finalized {
            return Err(PipelineError::AlreadyFinalized(self.metadata_key.to_string()));
        }
        match self.store.head(&self.metadata_key).await {
            Ok(_) => {
                return Err(PipelineError::AlreadyFinalized(self.metadata_key.to_string()))
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(PipelineError::ObjectStore(e)),
        }
        let payload = std::mem::take(&mut self.scratch);
        self.store
            .put(&self.payload_key, PutPayload::from(Bytes::from(payload)))
            .await?;
        let metadata_bytes = serde_json::to_vec(&metadata)?;
        self.store
            .put(&self.metadata_key, PutPayload::from(Bytes::from(metadata_bytes)))
            .await?;
        self.finalized = true;
        Ok(())
    }
}

struct ObjectPartitionReader {
    store: Arc<dyn ObjectStore>,
    payload_key: ObjectPath,
    metadata_key: ObjectPath,
}

#[async_trait]
impl PartitionReader for ObjectPartitionReader {
    async fn iter_payload_rows(&self) -> Result<Vec<Value>> {
        let bytes = self.store.get(&self.payload_key).await?.bytes().await?;
        let text = String::from_utf8_lossy(&bytes);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PipelineError::from))
            .collect()
    }

    async fn read_metadata(&self) -> Result<RunMetadata> {
        let bytes = self.store.get(&self.metadata_key).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
