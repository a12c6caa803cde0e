//! Durable `PartitionState` table (C3): one row per `PartitionKey`.

use crate::error::Result;
use crate::identity::PartitionKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Pending,
    Success,
    Failed,
}

impl PartitionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Pending => "pending",
            PartitionStatus::Success => "success",
            PartitionStatus::Failed => "failed",
        }
    }
}

impl FromStr for PartitionStatus {
    type Err = crate::error::PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PartitionStatus::Pending),
            "success" => Ok(PartitionStatus::Success),
            "failed" => Ok(PartitionStatus::Failed),
            other => Err(crate::error::PipelineError::Validation(format!(
                "unknown partition status '{other}'"
            ))),
        }
    }
}

/// Substring that marks a `failed` state as terminal: the pipeline must not
/// automatically retry it.
pub const TERMINAL_MARKER: &str = "[terminal]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionState {
    pub source: String,
    pub customer_id: String,
    pub query_name: String,
    pub logical_date: NaiveDate,
    pub status: PartitionStatus,
    pub current_run_id: Option<String>,
    pub schema_version: Option<String>,
    pub record_count: Option<i64>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
}

impl PartitionState {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(
            self.source.clone(),
            self.customer_id.clone(),
            self.query_name.clone(),
            self.logical_date,
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status == PartitionStatus::Failed
            && self
                .error_message
                .as_deref()
                .map(|m| m.contains(TERMINAL_MARKER))
                .unwrap_or(false)
    }
}

fn row_to_state(row: SqliteRow) -> Result<PartitionState> {
    let logical_date: String = row.try_get("logical_date")?;
    let updated_at: String = row.try_get("updated_at")?;
    let status: String = row.try_get("status")?;
    Ok(PartitionState {
        source: row.try_get("source")?,
        customer_id: row.try_get("customer_id")?,
        query_name: row.try_get("query_name")?,
        logical_date: NaiveDate::parse_from_str(&logical_date, "%Y-%m-%d")
            .map_err(|e| crate::error::PipelineError::Validation(e.to_string()))?,
        status: status.parse()?,
        current_run_id: row.try_get("current_run_id")?,
        schema_version: row.try_get("schema_version")?,
        record_count: row.try_get("record_count")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| crate::error::PipelineError::Validation(e.to_string()))?
            .with_timezone(&Utc),
        error_message: row.try_get("error_message")?,
        attempt_count: row.try_get("attempt_count")?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct StateFilter {
    pub status: Option<PartitionStatus>,
    pub customer_id: Option<String>,
    pub query_name: Option<String>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub limit: Option<i64>,
}

pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().connect(&url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partition_state (
                source TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                query_name TEXT NOT NULL,
                logical_date TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending','success','failed')),
                current_run_id TEXT,
                schema_version TEXT,
                record_count BIGINT,
                updated_at TEXT NOT NULL,
                error_message TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (source, customer_id, query_name, logical_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, key: &PartitionKey) -> Result<Option<PartitionState>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM partition_state
             WHERE source = ? AND customer_id = ? AND query_name = ? AND logical_date = ?
            "#,
        )
        .bind(&key.source)
        .bind(&key.customer_id)
        .bind(&key.query_name)
        .bind(key.logical_date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_state).transpose()
    }

    pub async fn list(&self, filter: &StateFilter) -> Result<Vec<PartitionState>> {
        let mut sql = String::from("SELECT * FROM partition_state WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.customer_id.is_some() {
            sql.push_str(" AND customer_id = ?");
        }
        if filter.query_name.is_some() {
            sql.push_str(" AND query_name = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND logical_date >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND logical_date <= ?");
        }
        sql.push_str(" ORDER BY updated_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(customer_id) = &filter.customer_id {
            query = query.bind(customer_id);
        }
        if let Some(query_name) = &filter.query_name {
            query = query.bind(query_name);
        }
        if let Some(since) = filter.since {
            query = query.bind(since.to_string());
        }
        if let Some(until) = filter.until {
            query = query.bind(until.to_string());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_state).collect()
    }

    pub async fn upsert(&self, state: &PartitionState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partition_state (
                source, customer_id, query_name, logical_date, status,
                current_run_id, schema_version, record_count, updated_at,
                error_message, attempt_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, customer_id, query_name, logical_date) DO UPDATE SET
                status = excluded.status,
                current_run_id = excluded.current_run_id,
                schema_version = excluded.schema_version,
                record_count = excluded.record_count,
                updated_at = excluded.updated_at,
                error_message = excluded.error_message,
                attempt_count = excluded.attempt_count
            "#,
        )
        .bind(&state.source)
        .bind(&state.customer_id)
        .bind(&state.query_name)
        .bind(state.logical_date.to_string())
        .bind(state.status.as_str())
        .bind(&state.current_run_id)
        .bind(&state.schema_version)
        .bind(state.record_count)
        .bind(state.updated_at.to_rfc3339())
        .bind(&state.error_message)
        .bind(state.attempt_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(status: PartitionStatus, attempt_count: i64) -> PartitionState {
        PartitionState {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: "campaign_stats".into(),
            logical_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            status,
            current_run_id: Some("2024-06-10T00:00:00.000Z".into()),
            schema_version: Some("v1".into()),
            record_count: Some(10),
            updated_at: Utc::now(),
            error_message: None,
            attempt_count,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(dir.path().join("state.db")).await.unwrap();
        let state = sample_state(PartitionStatus::Success, 1);
        store.upsert(&state).await.unwrap();

        let fetched = store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(fetched.status, PartitionStatus::Success);
        assert_eq!(fetched.attempt_count, 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_all_non_key_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(dir.path().join("state.db")).await.unwrap();
        let mut state = sample_state(PartitionStatus::Failed, 1);
        state.error_message = Some("boom".into());
        store.upsert(&state).await.unwrap();

        let mut retried = state.clone();
        retried.status = PartitionStatus::Success;
        retried.error_message = None;
        retried.attempt_count = 2;
        store.upsert(&retried).await.unwrap();

        let fetched = store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(fetched.status, PartitionStatus::Success);
        assert!(fetched.error_message.is_none());
        assert_eq!(fetched.attempt_count, 2);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_orders_by_updated_at_desc() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(dir.path().join("state.db")).await.unwrap();

        let mut older = sample_state(PartitionStatus::Success, 1);
        older.logical_date = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        older.updated_at = Utc::now() - chrono::Duration::hours(2);
        store.upsert(&older).await.unwrap();

        let mut newer = sample_state(PartitionStatus::Success, 1);
        newer.logical_date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        store.upsert(&newer).await.unwrap();

        let mut failed = sample_state(PartitionStatus::Failed, 1);
        failed.logical_date = NaiveDate::from_ymd_opt(2024, 6, 11).unwrap();
        store.upsert(&failed).await.unwrap();

        let results = store
            .list(&StateFilter {
                status: Some(PartitionStatus::Success),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].logical_date, newer.logical_date);
        assert_eq!(results[1].logical_date, older.logical_date);
    }

    #[tokio::test]
    async fn terminal_failure_requires_marker_substring() {
        let mut state = sample_state(PartitionStatus::Failed, 3);
        state.error_message = Some("rate limited".into());
        assert!(!state.is_terminal());
        state.error_message = Some(format!("rate limited {TERMINAL_MARKER}"));
        assert!(state.is_terminal());
    }
}
