//! Filesystem-backed `RawSink` implementation.

use super::{logical_segments, partition_segments, PartitionReader, PartitionWriter, RawSink, RunMetadata};
use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn partition_dir(root: &Path, key: &PartitionKey, run_id: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for segment in partition_segments(key, run_id) {
        dir.push(segment);
    }
    dir
}

fn logical_dir(root: &Path, key: &PartitionKey) -> PathBuf {
    let mut dir = root.to_path_buf();
    for segment in logical_segments(key) {
        dir.push(segment);
    }
    dir
}

pub struct LocalFilesystemRawSink {
    root: PathBuf,
}

impl LocalFilesystemRawSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RawSink for LocalFilesystemRawSink {
    async fn write_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionWriter>> {
        let dir = partition_dir(&self.root, key, run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let metadata_path = dir.join("metadata.json");
        if metadata_path.exists() {
            return Err(PipelineError::AlreadyFinalized(format!(
                "{key} run_id={run_id}"
            )));
        }
        let payload_path = dir.join("payload.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&payload_path)
            .await?;
        Ok(Box::new(LocalPartitionWriter {
            file,
            payload_path,
            metadata_path,
            finalized: false,
        }))
    }

    async fn open_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> Result<Box<dyn PartitionReader>> {
        let dir = partition_dir(&self.root, key, run_id);
        let payload_path = dir.join("payload.jsonl");
        let metadata_path = dir.join("metadata.json");
        if !metadata_path.exists() || !payload_path.exists() {
            return Err(PipelineError::NotFound(format!(
                "{key} run_id={run_id} ({})",
                dir.display()
            )));
        }
        Ok(Box::new(LocalPartitionReader {
            payload_path,
            metadata_path,
        }))
    }

    async fn list_partitions(&self, key: &PartitionKey) -> Result<Vec<String>> {
        let dir = logical_dir(&self.root, key);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut run_ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(run_id) = name.strip_prefix("run_id=") {
                    run_ids.push(run_id.to_string());
                }
            }
        }
        run_ids.sort();
        Ok(run_ids)
    }
}

struct LocalPartitionWriter {
    file: tokio::fs::File,
    payload_path: PathBuf,
    metadata_path: PathBuf,
    finalized: bool,
}

#[async_trait]
impl PartitionWriter for LocalPartitionWriter {
    async fn append_payload_row(&mut self, row: &Value) -> Result<()> {
        if self.finalized {
            return Err(PipelineError::AlreadyFinalized(
                self.payload_path.display().to_string(),
            ));
        }
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        Ok(())
    }

    async fn finalize(&mut self, metadata: RunMetadata) -> Result<()> {
        if self.finalized || self.metadata_path.exists() {
            return Err(PipelineError::AlreadyFinalized(
                self.metadata_path.display().to_string(),
            ));
        }
        self.file.flush().await?;
        self.file.sync_all().await?;
        let bytes = serde_json::to_vec(&metadata)?;
        tokio::fs::write(&self.metadata_path, bytes).await?;
        self.finalized = true;
        Ok(())
    }
}

struct LocalPartitionReader {
    payload_path: PathBuf,
    metadata_path: PathBuf,
}

#[async_trait]
impl PartitionReader for LocalPartitionReader {
    async fn iter_payload_rows(&self) -> Result<Vec<Value>> {
        let file = tokio::fs::File::open(&self.payload_path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut rows = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(rows)
    }

    async fn read_metadata(&self) -> Result<RunMetadata> {
        let bytes = tokio::fs::read(&self.metadata_path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_metadata(run_id: &str, record_count: u64) -> RunMetadata {
        RunMetadata {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: "campaign_stats".into(),
            logical_date: "2024-06-10".into(),
            run_id: run_id.into(),
            extracted_at: "2024-06-10T00:00:00.000Z".into(),
            schema_version: "v1".into(),
            record_count,
            api_version: "v17".into(),
            query_signature: "SELECT campaign.id FROM campaign".into(),
        }
    }

    fn sample_key() -> PartitionKey {
        PartitionKey::new(
            "google_ads",
            "1234567890",
            "campaign_stats",
            chrono::NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let key = sample_key();

        let mut writer = sink.write_partition(&key, "r1").await.unwrap();
        writer.append_payload_row(&json!({"a": 1})).await.unwrap();
        writer.append_payload_row(&json!({"a": 2})).await.unwrap();
        writer.finalize(sample_metadata("r1", 2)).await.unwrap();

        let reader = sink.open_partition(&key, "r1").await.unwrap();
        let rows = reader.iter_payload_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        let metadata = reader.read_metadata().await.unwrap();
        assert_eq!(metadata.record_count, 2);
    }

    #[tokio::test]
    async fn open_unfinalized_partition_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let key = sample_key();

        let mut writer = sink.write_partition(&key, "r1").await.unwrap();
        writer.append_payload_row(&json!({"a": 1})).await.unwrap();

        let err = sink.open_partition(&key, "r1").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn second_finalize_is_already_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let key = sample_key();

        let mut writer = sink.write_partition(&key, "r1").await.unwrap();
        writer.finalize(sample_metadata("r1", 0)).await.unwrap();
        let err = writer.finalize(sample_metadata("r1", 0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn write_partition_refuses_when_already_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let key = sample_key();

        let mut writer = sink.write_partition(&key, "r1").await.unwrap();
        writer.finalize(sample_metadata("r1", 0)).await.unwrap();

        let err = sink.write_partition(&key, "r1").await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn list_partitions_is_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let key = sample_key();

        for run_id in ["2024-06-10T02:00:00.000Z", "2024-06-10T01:00:00.000Z"] {
            let mut writer = sink.write_partition(&key, run_id).await.unwrap();
            writer.finalize(sample_metadata(run_id, 0)).await.unwrap();
        }

        let run_ids = sink.list_partitions(&key).await.unwrap();
        assert_eq!(
            run_ids,
            vec!["2024-06-10T01:00:00.000Z", "2024-06-10T02:00:00.000Z"]
        );
    }

    #[tokio::test]
    async fn list_partitions_on_missing_logical_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let run_ids = sink.list_partitions(&sample_key()).await.unwrap();
        assert!(run_ids.is_empty());
    }
}
