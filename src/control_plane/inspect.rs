//! `state inspect`: filtered listing of partition state, table or JSON.

use crate::error::Result;
use crate::state_store::{PartitionState, StateFilter, StateStore};
use serde_json::json;
use tabled::{Table, Tabled};

pub async fn inspect(store: &StateStore, filter: &StateFilter) -> Result<Vec<PartitionState>> {
    store.list(filter).await
}

#[derive(Tabled)]
struct StateRow {
    source: String,
    customer_id: String,
    query_name: String,
    logical_date: String,
    status: String,
    current_run_id: String,
    record_count: String,
    updated_at: String,
}

impl From<&PartitionState> for StateRow {
    fn from(state: &PartitionState) -> Self {
        Self {
            source: state.source.clone(),
            customer_id: state.customer_id.clone(),
            query_name: state.query_name.clone(),
            logical_date: state.logical_date.to_string(),
            status: format!("{:?}", state.status).to_lowercase(),
            current_run_id: state.current_run_id.clone().unwrap_or_else(|| "-".into()),
            record_count: state
                .record_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into()),
            updated_at: state.updated_at.to_rfc3339(),
        }
    }
}

pub fn render_states_table(states: &[PartitionState]) -> String {
    if states.is_empty() {
        return "No partition state records found.".to_string();
    }
    let rows: Vec<StateRow> = states.iter().map(StateRow::from).collect();
    Table::new(rows).to_string()
}

pub fn render_states_json(states: &[PartitionState]) -> Result<String> {
    let payload: Vec<_> = states
        .iter()
        .map(|state| {
            json!({
                "source": state.source,
                "customer_id": state.customer_id,
                "query_name": state.query_name,
                "logical_date": state.logical_date.to_string(),
                "status": format!("{:?}", state.status).to_lowercase(),
                "current_run_id": state.current_run_id,
                "schema_version": state.schema_version,
                "record_count": state.record_count,
                "updated_at": state.updated_at.to_rfc3339(),
                "error_message": state.error_message,
                "attempt_count": state.attempt_count,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&payload)?)
}
