//! `state mark-terminal`: flags failed partitions so the pipeline stops
//! automatically retrying them.

use crate::error::{PipelineError, Result};
use crate::identity::PartitionKey;
use crate::state_store::{PartitionState, PartitionStatus, StateFilter, StateStore, TERMINAL_MARKER};
use chrono::Utc;

const DEFAULT_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct MarkTerminalOptions {
    pub force: bool,
    pub dry_run: bool,
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MarkTerminalReport {
    pub marked: Vec<PartitionKey>,
    pub already_terminal: Vec<PartitionKey>,
    pub dry_run: bool,
}

fn terminal_message(state: &PartitionState) -> String {
    match &state.error_message {
        Some(message) if message.contains(TERMINAL_MARKER) => message.clone(),
        Some(message) if !message.is_empty() => format!("{TERMINAL_MARKER} {message}"),
        _ => TERMINAL_MARKER.to_string(),
    }
}

pub async fn mark_terminal(
    store: &StateStore,
    filter: &StateFilter,
    options: &MarkTerminalOptions,
) -> Result<MarkTerminalReport> {
    if filter.customer_id.is_none()
        && filter.query_name.is_none()
        && filter.since.is_none()
        && filter.until.is_none()
        && !options.force
    {
        return Err(PipelineError::OperatorGuard(
            "refusing to mark all partitions terminal without --force; provide filters or use --force".into(),
        ));
    }

    let mut scoped = filter.clone();
    scoped.status = Some(PartitionStatus::Failed);
    let states = store.list(&scoped).await?;

    let threshold = options.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if states.len() > threshold && !options.force {
        return Err(PipelineError::OperatorGuard(format!(
            "{} partitions exceed the mark-terminal threshold ({threshold}); pass --force to proceed",
            states.len()
        )));
    }

    let mut already_terminal = Vec::new();
    let mut candidates = Vec::new();
    for state in states {
        if state.is_terminal() {
            already_terminal.push(state.key());
        } else {
            candidates.push(state);
        }
    }

    let mut marked = Vec::new();
    for state in candidates {
        let key = state.key();
        if !options.dry_run {
            let mut next = state.clone();
            next.error_message = Some(terminal_message(&state));
            next.updated_at = Utc::now();
            store.upsert(&next).await?;
        }
        marked.push(key);
    }

    Ok(MarkTerminalReport {
        marked,
        already_terminal,
        dry_run: options.dry_run,
    })
}
