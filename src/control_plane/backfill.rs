//! `state backfill enqueue`: seeds `pending` rows for a historical date range.

use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use crate::state_store::{PartitionState, PartitionStatus, StateStore};
use chrono::{NaiveDate, Utc};

const DEFAULT_THRESHOLD: usize = 100;
const SOURCE_NAME: &str = "google_ads";

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub customer_id: String,
    pub query_name: String,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub force_pending: bool,
    pub dry_run: bool,
    pub force: bool,
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub enqueued: Vec<PartitionKey>,
    pub skipped: Vec<PartitionKey>,
    pub dry_run: bool,
}

pub async fn backfill_enqueue(store: &StateStore, options: &BackfillOptions) -> Result<BackfillReport> {
    if options.since > options.until {
        return Err(PipelineError::OperatorGuard("since must be <= until".into()));
    }

    let mut dates = Vec::new();
    let mut cursor = options.since;
    while cursor <= options.until {
        dates.push(cursor);
        cursor += chrono::Duration::days(1);
    }

    let threshold = options.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if dates.len() > threshold && !options.force {
        return Err(PipelineError::OperatorGuard(format!(
            "{} partitions exceed the backfill threshold ({threshold}); pass --force to proceed",
            dates.len()
        )));
    }

    let mut enqueued = Vec::new();
    let mut skipped = Vec::new();
    for logical_date in dates {
        let key = PartitionKey::new(
            SOURCE_NAME,
            options.customer_id.clone(),
            options.query_name.clone(),
            logical_date,
        );
        let existing = store.get(&key).await?;
        if existing.is_some() && !options.force_pending {
            skipped.push(key);
            continue;
        }

        if !options.dry_run {
            let next = PartitionState {
                source: key.source.clone(),
                customer_id: key.customer_id.clone(),
                query_name: key.query_name.clone(),
                logical_date: key.logical_date,
                status: PartitionStatus::Pending,
                current_run_id: existing
                    .as_ref()
                    .filter(|_| options.force_pending)
                    .and_then(|s| s.current_run_id.clone()),
                schema_version: existing.as_ref().and_then(|s| s.schema_version.clone()),
                record_count: existing.as_ref().and_then(|s| s.record_count),
                updated_at: Utc::now(),
                error_message: None,
                attempt_count: existing.as_ref().map(|s| s.attempt_count).unwrap_or(0),
            };
            store.upsert(&next).await?;
        }
        enqueued.push(key);
    }

    Ok(BackfillReport {
        enqueued,
        skipped,
        dry_run: options.dry_run,
    })
}
