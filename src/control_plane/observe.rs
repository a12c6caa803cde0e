//! `observe state` / `observe freshness` / `observe retries`: read-only summaries.

use crate::identity::PartitionKey;
use crate::state_store::{PartitionState, PartitionStatus};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct AttemptStats {
    pub min: i64,
    pub max: i64,
    pub avg: f64,
}

fn attempt_stats(counts: &[i64]) -> AttemptStats {
    if counts.is_empty() {
        return AttemptStats::default();
    }
    let min = *counts.iter().min().unwrap();
    let max = *counts.iter().max().unwrap();
    let avg = counts.iter().sum::<i64>() as f64 / counts.len() as f64;
    AttemptStats { min, max, avg }
}

#[derive(Debug, Clone)]
pub struct FailedPartitionSummary {
    pub key: PartitionKey,
    pub attempt_count: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StateSummary {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    pub date_ranges_by_query: BTreeMap<(String, String), (NaiveDate, NaiveDate)>,
    pub attempts: AttemptStats,
    pub top_failed: Vec<FailedPartitionSummary>,
    pub oldest_failed: Option<FailedPartitionSummary>,
}

pub fn observe_state(states: &[PartitionState], top_failed: usize) -> StateSummary {
    let mut summary = StateSummary {
        total: states.len(),
        ..Default::default()
    };
    let mut attempt_values = Vec::with_capacity(states.len());
    let mut failed_states = Vec::new();

    for state in states {
        match state.status {
            PartitionStatus::Pending => summary.pending += 1,
            PartitionStatus::Success => summary.success += 1,
            PartitionStatus::Failed => summary.failed += 1,
        }
        let key = (state.source.clone(), state.query_name.clone());
        summary
            .date_ranges_by_query
            .entry(key)
            .and_modify(|(min, max)| {
                if state.logical_date < *min {
                    *min = state.logical_date;
                }
                if state.logical_date > *max {
                    *max = state.logical_date;
                }
            })
            .or_insert((state.logical_date, state.logical_date));
        attempt_values.push(state.attempt_count);
        if state.status == PartitionStatus::Failed {
            failed_states.push(state);
        }
    }

    summary.attempts = attempt_stats(&attempt_values);

    let mut sorted_failed = failed_states.clone();
    sorted_failed.sort_by(|a, b| {
        b.attempt_count
            .cmp(&a.attempt_count)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
            .then_with(|| a.query_name.cmp(&b.query_name))
            .then_with(|| a.logical_date.cmp(&b.logical_date))
    });
    summary.top_failed = sorted_failed
        .into_iter()
        .take(top_failed)
        .map(|s| FailedPartitionSummary {
            key: s.key(),
            attempt_count: s.attempt_count,
            updated_at: s.updated_at,
        })
        .collect();

    summary.oldest_failed = failed_states
        .iter()
        .min_by_key(|s| s.updated_at)
        .map(|s| FailedPartitionSummary {
            key: s.key(),
            attempt_count: s.attempt_count,
            updated_at: s.updated_at,
        });

    summary
}

#[derive(Debug, Clone)]
pub struct FreshnessEntry {
    pub source: String,
    pub query_name: String,
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
    pub lag_days: i64,
    pub total_successful_partitions: usize,
    pub gaps: Vec<(NaiveDate, NaiveDate)>,
}

pub type FreshnessReport = Vec<FreshnessEntry>;

/// Finds missing calendar dates between the earliest and latest of `dates`,
/// collapsing contiguous runs into `start..=end` spans.
fn find_date_gaps(sorted_dates: &[NaiveDate]) -> Vec<(NaiveDate, NaiveDate)> {
    if sorted_dates.len() < 2 {
        return Vec::new();
    }
    let present: std::collections::HashSet<_> = sorted_dates.iter().collect();
    let mut gaps = Vec::new();
    let mut current = sorted_dates[0];
    let end = *sorted_dates.last().unwrap();
    while current <= end {
        if !present.contains(&current) {
            let gap_start = current;
            while current <= end && !present.contains(&current) {
                current += chrono::Duration::days(1);
            }
            gaps.push((gap_start, current - chrono::Duration::days(1)));
            continue;
        }
        current += chrono::Duration::days(1);
    }
    gaps
}

pub fn observe_freshness(states: &[PartitionState], today: NaiveDate) -> FreshnessReport {
    let mut grouped: BTreeMap<(String, String), Vec<NaiveDate>> = BTreeMap::new();
    for state in states {
        if state.status != PartitionStatus::Success {
            continue;
        }
        grouped
            .entry((state.source.clone(), state.query_name.clone()))
            .or_default()
            .push(state.logical_date);
    }

    grouped
        .into_iter()
        .map(|((source, query_name), mut dates)| {
            dates.sort();
            dates.dedup();
            let earliest = dates[0];
            let latest = *dates.last().unwrap();
            FreshnessEntry {
                gaps: find_date_gaps(&dates),
                lag_days: (today - latest).num_days(),
                total_successful_partitions: dates.len(),
                source,
                query_name,
                earliest,
                latest,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct AttemptHistogram {
    pub one_to_two: usize,
    pub three_to_five: usize,
    pub six_to_ten: usize,
    pub more_than_ten: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RetriesReport {
    pub total: usize,
    pub failed: usize,
    pub terminal: usize,
    pub retryable_failed: usize,
    pub attempts: AttemptStats,
    pub histogram: AttemptHistogram,
    pub top_partitions: Vec<FailedPartitionSummary>,
    pub oldest_failed: Option<FailedPartitionSummary>,
    pub newest_failed: Option<FailedPartitionSummary>,
}

pub fn observe_retries(states: &[PartitionState], top_partitions: usize) -> RetriesReport {
    let failed: Vec<&PartitionState> = states.iter().filter(|s| s.status == PartitionStatus::Failed).collect();
    let terminal_count = failed.iter().filter(|s| s.is_terminal()).count();

    let attempt_counts: Vec<i64> = states.iter().map(|s| s.attempt_count).collect();
    let mut histogram = AttemptHistogram::default();
    for attempts in &attempt_counts {
        match attempts {
            0..=2 => histogram.one_to_two += 1,
            3..=5 => histogram.three_to_five += 1,
            6..=10 => histogram.six_to_ten += 1,
            _ => histogram.more_than_ten += 1,
        }
    }

    let mut hot: Vec<&PartitionState> = states.iter().collect();
    hot.sort_by(|a, b| {
        b.attempt_count
            .cmp(&a.attempt_count)
            .then_with(|| (a.status != PartitionStatus::Failed).cmp(&(b.status != PartitionStatus::Failed)))
            .then_with(|| a.customer_id.cmp(&b.customer_id))
            .then_with(|| a.query_name.cmp(&b.query_name))
            .then_with(|| a.logical_date.cmp(&b.logical_date))
    });
    let top_partitions_summary = hot
        .into_iter()
        .take(top_partitions)
        .map(|s| FailedPartitionSummary {
            key: s.key(),
            attempt_count: s.attempt_count,
            updated_at: s.updated_at,
        })
        .collect();

    let oldest_failed = failed
        .iter()
        .min_by_key(|s| s.updated_at)
        .map(|s| FailedPartitionSummary {
            key: s.key(),
            attempt_count: s.attempt_count,
            updated_at: s.updated_at,
        });
    let newest_failed = failed
        .iter()
        .max_by_key(|s| s.updated_at)
        .map(|s| FailedPartitionSummary {
            key: s.key(),
            attempt_count: s.attempt_count,
            updated_at: s.updated_at,
        });

    RetriesReport {
        total: states.len(),
        failed: failed.len(),
        terminal: terminal_count,
        retryable_failed: failed.len() - terminal_count,
        attempts: attempt_stats(&attempt_counts),
        histogram,
        top_partitions: top_partitions_summary,
        oldest_failed,
        newest_failed,
    }
}
