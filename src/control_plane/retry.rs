//! `state retry`: requeue failed partitions by flipping them back to pending.

use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use crate::state_store::{PartitionState, PartitionStatus, StateFilter, StateStore};
use chrono::Utc;

const DEFAULT_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub force: bool,
    pub clear_terminal: bool,
    pub dry_run: bool,
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RetryReport {
    pub retried: Vec<PartitionKey>,
    pub blocked_terminal: Vec<PartitionKey>,
    pub dry_run: bool,
}

/// Requeues `status=failed` rows matching `filter`. Terminal failures are
/// excluded unless `options.clear_terminal` is set. Guards: refuses to act on
/// an unfiltered selector set, and refuses selections above the threshold,
/// both unless `options.force` is set.
pub async fn retry_partitions(
    store: &StateStore,
    filter: &StateFilter,
    options: &RetryOptions,
) -> Result<RetryReport> {
    if filter.customer_id.is_none()
        && filter.query_name.is_none()
        && filter.since.is_none()
        && filter.until.is_none()
        && !options.force
    {
        return Err(PipelineError::OperatorGuard(
            "Refusing to retry everything without --force".into(),
        ));
    }

    let mut scoped = filter.clone();
    scoped.status = Some(PartitionStatus::Failed);
    let states = store.list(&scoped).await?;

    let threshold = options.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if states.len() > threshold && !options.force {
        return Err(PipelineError::OperatorGuard(format!(
            "{} partitions exceed the retry threshold ({threshold}); pass --force to proceed",
            states.len()
        )));
    }

    let mut eligible: Vec<PartitionState> = Vec::new();
    let mut blocked_terminal = Vec::new();
    for state in states {
        if state.is_terminal() && !options.clear_terminal {
            blocked_terminal.push(state.key());
            continue;
        }
        eligible.push(state);
    }

    let mut retried = Vec::new();
    for state in eligible {
        let key = state.key();
        if !options.dry_run {
            let mut next = state.clone();
            next.status = PartitionStatus::Pending;
            next.updated_at = Utc::now();
            if options.clear_terminal {
                next.error_message = None;
            }
            store.upsert(&next).await?;
        }
        retried.push(key);
    }

    Ok(RetryReport {
        retried,
        blocked_terminal,
        dry_run: options.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::TERMINAL_MARKER;
    use chrono::NaiveDate;

    fn failed_state(query_name: &str, terminal: bool) -> PartitionState {
        PartitionState {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: query_name.into(),
            logical_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            status: PartitionStatus::Failed,
            current_run_id: Some("r1".into()),
            schema_version: Some("v1".into()),
            record_count: Some(0),
            updated_at: Utc::now(),
            error_message: Some(if terminal {
                format!("rate limited {TERMINAL_MARKER}")
            } else {
                "rate limited".into()
            }),
            attempt_count: 2,
        }
    }

    async fn store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(dir.path().join("state.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn refuses_unfiltered_retry_without_force() {
        let (store, _dir) = store().await;
        store.upsert(&failed_state("campaign_stats", false)).await.unwrap();
        let err = retry_partitions(&store, &StateFilter::default(), &RetryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::OperatorGuard(_)));
    }

    #[tokio::test]
    async fn filtered_retry_flips_status_to_pending() {
        let (store, _dir) = store().await;
        let state = failed_state("campaign_stats", false);
        store.upsert(&state).await.unwrap();

        let filter = StateFilter {
            query_name: Some("campaign_stats".into()),
            ..Default::default()
        };
        let report = retry_partitions(&store, &filter, &RetryOptions::default())
            .await
            .unwrap();
        assert_eq!(report.retried.len(), 1);

        let updated = store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(updated.status, PartitionStatus::Pending);
        assert_eq!(updated.attempt_count, 2);
    }

    #[tokio::test]
    async fn terminal_state_is_blocked_without_clear_terminal() {
        let (store, _dir) = store().await;
        let state = failed_state("campaign_stats", true);
        store.upsert(&state).await.unwrap();

        let filter = StateFilter {
            query_name: Some("campaign_stats".into()),
            ..Default::default()
        };
        let report = retry_partitions(&store, &filter, &RetryOptions::default())
            .await
            .unwrap();
        assert!(report.retried.is_empty());
        assert_eq!(report.blocked_terminal.len(), 1);
    }

    #[tokio::test]
    async fn clear_terminal_unblocks_and_clears_message() {
        let (store, _dir) = store().await;
        let state = failed_state("campaign_stats", true);
        store.upsert(&state).await.unwrap();

        let filter = StateFilter {
            query_name: Some("campaign_stats".into()),
            ..Default::default()
        };
        let options = RetryOptions {
            clear_terminal: true,
            ..Default::default()
        };
        let report = retry_partitions(&store, &filter, &options).await.unwrap();
        assert_eq!(report.retried.len(), 1);

        let updated = store.get(&state.key()).await.unwrap().unwrap();
        assert!(updated.error_message.is_none());
    }

    #[tokio::test]
    async fn dry_run_leaves_state_unchanged() {
        let (store, _dir) = store().await;
        let state = failed_state("campaign_stats", false);
        store.upsert(&state).await.unwrap();

        let filter = StateFilter {
            query_name: Some("campaign_stats".into()),
            ..Default::default()
        };
        let options = RetryOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = retry_partitions(&store, &filter, &options).await.unwrap();
        assert_eq!(report.retried.len(), 1);

        let unchanged = store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(unchanged.status, PartitionStatus::Failed);
    }
}
