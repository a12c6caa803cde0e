//! Validator (C5): opens a finalized raw run, verifies it, upserts `PartitionState`.

use crate::identity::PartitionKey;
use crate::raw_sink::RawSink;
use crate::state_store::{PartitionState, PartitionStatus, StateStore};
use chrono::Utc;
use std::sync::Arc;

pub struct Validator {
    raw_sink: Arc<dyn RawSink>,
    state_store: Arc<StateStore>,
}

impl Validator {
    pub fn new(raw_sink: Arc<dyn RawSink>, state_store: Arc<StateStore>) -> Self {
        Self {
            raw_sink,
            state_store,
        }
    }

    /// Validates `(key, run_id)` and returns the resulting, already-persisted state.
    /// Never returns an `Err` for validation failures, those are recorded as a
    /// `failed` state; only state-store I/O failures propagate.
    #[tracing::instrument(skip(self), fields(
        customer_id = %key.customer_id,
        query_name = %key.query_name,
        logical_date = %key.logical_date,
        run_id = %run_id,
    ))]
    pub async fn validate_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
    ) -> crate::error::Result<PartitionState> {
        let reader = match self.raw_sink.open_partition(key, run_id).await {
            Ok(reader) => reader,
            Err(e) => return self.record_failure(key, format!("Partition not found: {e}")).await,
        };

        let metadata = match reader.read_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => return self.record_failure(key, format!("Metadata read failed: {e}")).await,
        };

        let rows = match reader.iter_payload_rows().await {
            Ok(rows) => rows,
            Err(e) => return self.record_failure(key, format!("Payload read failed: {e}")).await,
        };

        if metadata.record_count != rows.len() as u64 {
            let message = format!(
                "Record count mismatch: metadata={} actual={}",
                metadata.record_count,
                rows.len()
            );
            return self.record_failure(key, message).await;
        }

        self.record_success(key, run_id, metadata.record_count, &metadata.schema_version)
            .await
    }

    async fn record_success(
        &self,
        key: &PartitionKey,
        run_id: &str,
        record_count: u64,
        schema_version: &str,
    ) -> crate::error::Result<PartitionState> {
        let previous = self.state_store.get(key).await?;

        let (selected_run_id, selected_count, selected_schema_version) = match &previous {
            Some(prev) if prev.current_run_id.is_some() => {
                let existing_run_id = prev.current_run_id.as_deref().unwrap();
                if run_id < existing_run_id {
                    (
                        existing_run_id.to_string(),
                        prev.record_count.unwrap_or(record_count as i64),
                        prev.schema_version.clone().unwrap_or_else(|| schema_version.to_string()),
                    )
                } else {
                    (run_id.to_string(), record_count as i64, schema_version.to_string())
                }
            }
            _ => (run_id.to_string(), record_count as i64, schema_version.to_string()),
        };

        let state = PartitionState {
            source: key.source.clone(),
            customer_id: key.customer_id.clone(),
            query_name: key.query_name.clone(),
            logical_date: key.logical_date,
            status: PartitionStatus::Success,
            current_run_id: Some(selected_run_id),
            schema_version: Some(selected_schema_version),
            record_count: Some(selected_count),
            updated_at: Utc::now(),
            error_message: None,
            attempt_count: previous.as_ref().map(|p| p.attempt_count).unwrap_or(0) + 1,
        };
        self.state_store.upsert(&state).await?;
        tracing::info!(run_id = %state.current_run_id.as_deref().unwrap_or(""), "partition validated: success");
        Ok(state)
    }

    async fn record_failure(
        &self,
        key: &PartitionKey,
        message: String,
    ) -> crate::error::Result<PartitionState> {
        let previous = self.state_store.get(key).await?;
        let state = PartitionState {
            source: key.source.clone(),
            customer_id: key.customer_id.clone(),
            query_name: key.query_name.clone(),
            logical_date: key.logical_date,
            status: PartitionStatus::Failed,
            current_run_id: previous.as_ref().and_then(|p| p.current_run_id.clone()),
            schema_version: previous.as_ref().and_then(|p| p.schema_version.clone()),
            record_count: previous.as_ref().and_then(|p| p.record_count),
            updated_at: Utc::now(),
            error_message: Some(message.clone()),
            attempt_count: previous.as_ref().map(|p| p.attempt_count).unwrap_or(0) + 1,
        };
        self.state_store.upsert(&state).await?;
        tracing::warn!(error_message = %message, "partition validated: failed");
        Ok(state)
    }
}
