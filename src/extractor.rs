//! Extractor (C4): drives a `ReportClient`, streams rows into the Raw Sink.

use crate::config::QueryDefinition;
use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use crate::raw_sink::{RawSink, RunMetadata};
use crate::report_client::ReportClient;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;

pub const SOURCE_NAME: &str = "google_ads";
pub const SCHEMA_VERSION: &str = "v1";

pub struct Extractor {
    client: Arc<dyn ReportClient>,
    raw_sink: Arc<dyn RawSink>,
    api_version: String,
}

pub struct ExtractTarget<'a> {
    pub query: &'a QueryDefinition,
    pub customer_id: &'a str,
    pub logical_date: NaiveDate,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Extractor {
    pub fn new(
        client: Arc<dyn ReportClient>,
        raw_sink: Arc<dyn RawSink>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            raw_sink,
            api_version: api_version.into(),
        }
    }

    /// Extracts one partition, writing it into the Raw Sink under `run_id`.
    /// Returns the resulting key; the caller hands `(key, run_id)` to the Validator.
    #[tracing::instrument(skip(self, target), fields(
        customer_id = %target.customer_id,
        query_name = %target.query.name,
        logical_date = %target.logical_date,
        run_id = %run_id,
    ))]
    pub async fn extract_partition(
        &self,
        target: ExtractTarget<'_>,
        run_id: &str,
    ) -> Result<PartitionKey> {
        let key = PartitionKey::new(
            SOURCE_NAME,
            target.customer_id,
            target.query.name.clone(),
            target.logical_date,
        );
        let query_signature = build_query_signature(target.query, target.start, target.end);
        let mut writer = self.raw_sink.write_partition(&key, run_id).await?;

        let rows = self
            .client
            .stream_rows(target.query, target.customer_id, target.start, target.end)
            .await?;

        let mut record_count: u64 = 0;
        for row in &rows {
            let flattened = flatten_row(row, target.query)?;
            writer.append_payload_row(&flattened).await?;
            record_count += 1;
        }

        let metadata = RunMetadata {
            source: key.source.clone(),
            customer_id: key.customer_id.clone(),
            query_name: key.query_name.clone(),
            logical_date: key.logical_date.to_string(),
            run_id: run_id.to_string(),
            extracted_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            record_count,
            api_version: self.api_version.clone(),
            query_signature,
        };
        writer.finalize(metadata).await?;
        tracing::info!(record_count, "partition extracted");
        Ok(key)
    }
}

fn build_query_signature(query: &QueryDefinition, start: NaiveDate, end: NaiveDate) -> String {
    let fields = query.fields.join(", ");
    format!(
        "SELECT {fields} FROM {} WHERE {} BETWEEN '{start}' AND '{end}'",
        query.entity, query.date_column
    )
}

/// Traverses each field's dotted path in `row`, storing the resulting scalar
/// under the field name with dots replaced by underscores.
fn flatten_row(row: &Value, query: &QueryDefinition) -> Result<Value> {
    let mut flattened = serde_json::Map::new();
    for field in &query.fields {
        let mut cursor = row;
        for part in field.split('.') {
            cursor = cursor.get(part).ok_or_else(|| {
                PipelineError::Validation(format!("field '{field}' missing path segment '{part}'"))
            })?;
        }
        flattened.insert(field.replace('.', "_"), cursor.clone());
    }
    flattened.insert("__query_name".to_string(), Value::String(query.name.clone()));
    Ok(Value::Object(flattened))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_sink::LocalFilesystemRawSink;
    use crate::report_client::MockReportClient;
    use serde_json::json;

    fn sample_query() -> QueryDefinition {
        QueryDefinition {
            name: "campaign_stats".into(),
            entity: "campaign".into(),
            date_column: "segments.date".into(),
            fields: vec!["campaign.id".into(), "metrics.clicks".into()],
        }
    }

    #[test]
    fn query_signature_matches_canonical_gaql_shape() {
        let query = sample_query();
        let sig = build_query_signature(
            &query,
            NaiveDate::from_ymd_opt(2024, 6, 8).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
        );
        assert_eq!(
            sig,
            "SELECT campaign.id, metrics.clicks FROM campaign WHERE segments.date BETWEEN '2024-06-08' AND '2024-06-10'"
        );
    }

    #[test]
    fn flatten_row_replaces_dots_and_tags_query_name() {
        let query = sample_query();
        let row = json!({"campaign": {"id": 42}, "metrics": {"clicks": 7}});
        let flattened = flatten_row(&row, &query).unwrap();
        assert_eq!(flattened["campaign_id"], 42);
        assert_eq!(flattened["metrics_clicks"], 7);
        assert_eq!(flattened["__query_name"], "campaign_stats");
    }

    #[test]
    fn flatten_row_fails_on_missing_path_segment() {
        let query = sample_query();
        let row = json!({"campaign": {"id": 42}});
        let err = flatten_row(&row, &query).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn extract_partition_writes_and_finalizes_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let raw_sink: Arc<dyn RawSink> = Arc::new(LocalFilesystemRawSink::new(dir.path()));
        let rows = vec![
            json!({"campaign": {"id": 1}, "metrics": {"clicks": 3}}),
            json!({"campaign": {"id": 2}, "metrics": {"clicks": 5}}),
        ];
        let client: Arc<dyn ReportClient> = Arc::new(MockReportClient::new(rows));
        let extractor = Extractor::new(client, Arc::clone(&raw_sink), "v17");

        let query = sample_query();
        let logical_date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let target = ExtractTarget {
            query: &query,
            customer_id: "1234567890",
            logical_date,
            start: NaiveDate::from_ymd_opt(2024, 6, 8).unwrap(),
            end: logical_date,
        };
        let key = extractor.extract_partition(target, "r1").await.unwrap();

        let reader = raw_sink.open_partition(&key, "r1").await.unwrap();
        let stored_rows = reader.iter_payload_rows().await.unwrap();
        assert_eq!(stored_rows.len(), 2);
        let metadata = reader.read_metadata().await.unwrap();
        assert_eq!(metadata.record_count, 2);
        assert_eq!(metadata.api_version, "v17");
    }
}
