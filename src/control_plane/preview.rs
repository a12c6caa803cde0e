//! `consume preview`: read-only sampling of authoritative raw partitions.

use crate::error::Result;
use crate::identity::PartitionKey;
use crate::raw_sink::RawSink;
use crate::state_store::PartitionState;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

pub struct PartitionPreview {
    pub partition_key: PartitionKey,
    pub run_id: String,
    pub record_count: u64,
    pub sample_rows: Vec<Value>,
}

pub async fn collect_preview(
    sink: &dyn RawSink,
    partitions: &[PartitionState],
    sample_rows: usize,
) -> Result<Vec<PartitionPreview>> {
    let mut results = Vec::new();
    for state in partitions {
        let Some(run_id) = state.current_run_id.clone() else {
            continue;
        };
        let key = state.key();
        let reader = sink.open_partition(&key, &run_id).await?;
        let mut rows = reader.iter_payload_rows().await?;
        rows.truncate(sample_rows);
        let record_count = state.record_count.map(|c| c as u64).unwrap_or(rows.len() as u64);
        results.push(PartitionPreview {
            partition_key: key,
            run_id,
            record_count,
            sample_rows: rows,
        });
    }
    Ok(results)
}

#[derive(Tabled)]
struct PreviewRow {
    source: String,
    customer_id: String,
    query_name: String,
    logical_date: String,
    run_id: String,
    record_count: u64,
    sample_rows: usize,
}

pub fn render_preview(previews: &[PartitionPreview], as_json: bool) -> Result<String> {
    if previews.is_empty() {
        return Ok("No authoritative partitions found.".to_string());
    }
    if as_json {
        let payload: Vec<Value> = previews
            .iter()
            .map(|preview| {
                json!({
                    "source": preview.partition_key.source,
                    "customer_id": preview.partition_key.customer_id,
                    "query_name": preview.partition_key.query_name,
                    "logical_date": preview.partition_key.logical_date.to_string(),
                    "run_id": preview.run_id,
                    "record_count": preview.record_count,
                    "sample_rows": preview.sample_rows,
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&payload)?);
    }

    let rows: Vec<PreviewRow> = previews
        .iter()
        .map(|preview| PreviewRow {
            source: preview.partition_key.source.clone(),
            customer_id: preview.partition_key.customer_id.clone(),
            query_name: preview.partition_key.query_name.clone(),
            logical_date: preview.partition_key.logical_date.to_string(),
            run_id: preview.run_id.clone(),
            record_count: preview.record_count,
            sample_rows: preview.sample_rows.len(),
        })
        .collect();
    let summary = Table::new(rows).to_string();
    let samples: Vec<String> = previews
        .iter()
        .map(|preview| {
            format!(
                "{} {} sample:\n{}",
                preview.partition_key.query_name,
                preview.partition_key.logical_date,
                serde_json::to_string_pretty(&preview.sample_rows).unwrap_or_default()
            )
        })
        .collect();
    Ok(format!("{summary}\n\n{}", samples.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_sink::LocalFilesystemRawSink;
    use crate::state_store::PartitionStatus;
    use chrono::{NaiveDate, Utc};
    use serde_json::json as jsonval;

    fn sample_state(run_id: &str, record_count: i64) -> PartitionState {
        PartitionState {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: "campaign_stats".into(),
            logical_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            status: PartitionStatus::Success,
            current_run_id: Some(run_id.into()),
            schema_version: Some("v1".into()),
            record_count: Some(record_count),
            updated_at: Utc::now(),
            error_message: None,
            attempt_count: 1,
        }
    }

    #[tokio::test]
    async fn collect_preview_truncates_to_sample_size() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let state = sample_state("r1", 3);
        let key = state.key();

        let mut writer = sink.write_partition(&key, "r1").await.unwrap();
        for i in 0..3 {
            writer.append_payload_row(&jsonval!({"i": i})).await.unwrap();
        }
        writer
            .finalize(crate::raw_sink::RunMetadata {
                source: key.source.clone(),
                customer_id: key.customer_id.clone(),
                query_name: key.query_name.clone(),
                logical_date: key.logical_date.to_string(),
                run_id: "r1".into(),
                extracted_at: "2024-06-10T00:00:00.000Z".into(),
                schema_version: "v1".into(),
                record_count: 3,
                api_version: "v17".into(),
                query_signature: "SELECT 1".into(),
            })
            .await
            .unwrap();

        let previews = collect_preview(&sink, &[state], 2).await.unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].sample_rows.len(), 2);
        assert_eq!(previews[0].record_count, 3);
    }

    #[tokio::test]
    async fn collect_preview_skips_states_without_current_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFilesystemRawSink::new(dir.path());
        let mut state = sample_state("r1", 0);
        state.current_run_id = None;
        let previews = collect_preview(&sink, &[state], 5).await.unwrap();
        assert!(previews.is_empty());
    }
}
