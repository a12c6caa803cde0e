//! Durable `WarehousePointer` table (C6): one row per `PartitionKey`.

use crate::error::Result;
use crate::identity::PartitionKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehousePointer {
    pub source: String,
    pub customer_id: String,
    pub query_name: String,
    pub logical_date: NaiveDate,
    pub run_id: String,
    pub schema_version: String,
    pub loaded_at: DateTime<Utc>,
}

impl WarehousePointer {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(
            self.source.clone(),
            self.customer_id.clone(),
            self.query_name.clone(),
            self.logical_date,
        )
    }
}

pub struct WarehousePointerStore {
    pool: SqlitePool,
}

impl WarehousePointerStore {
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
            CREATE TABLE IF NOT EXISTS warehouse_pointers (
                source TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                query_name TEXT NOT NULL,
                logical_date TEXT NOT NULL,
                run_id TEXT NOT NULL,
                schema_version TEXT NOT NULL,
                loaded_at TEXT NOT NULL,
                PRIMARY KEY (source, customer_id, query_name, logical_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, key: &PartitionKey) -> Result<Option<WarehousePointer>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM warehouse_pointers
             WHERE source = ? AND customer_id = ? AND query_name = ? AND logical_date = ?
            "#,
        )
        .bind(&key.source)
        .bind(&key.customer_id)
        .bind(&key.query_name)
        .bind(key.logical_date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_pointer(&r)).transpose()
    }

    pub async fn upsert(&self, pointer: &WarehousePointer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouse_pointers (
                source, customer_id, query_name, logical_date, run_id, schema_version, loaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, customer_id, query_name, logical_date) DO UPDATE SET
                run_id = excluded.run_id,
                schema_version = excluded.schema_version,
                loaded_at = excluded.loaded_at
            "#,
        )
        .bind(&pointer.source)
        .bind(&pointer.customer_id)
        .bind(&pointer.query_name)
        .bind(pointer.logical_date.to_string())
        .bind(&pointer.run_id)
        .bind(&pointer.schema_version)
        .bind(pointer.loaded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &PartitionKey) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM warehouse_pointers
             WHERE source = ? AND customer_id = ? AND query_name = ? AND logical_date = ?
            "#,
        )
        .bind(&key.source)
        .bind(&key.customer_id)
        .bind(&key.query_name)
        .bind(key.logical_date.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<WarehousePointer>> {
        let rows = sqlx::query("SELECT * FROM warehouse_pointers")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_pointer).collect()
    }
}

fn row_to_pointer(row: &sqlx::sqlite::SqliteRow) -> Result<WarehousePointer> {
    let logical_date: String = row.try_get("logical_date")?;
    let loaded_at: String = row.try_get("loaded_at")?;
    Ok(WarehousePointer {
        source: row.try_get("source")?,
        customer_id: row.try_get("customer_id")?,
        query_name: row.try_get("query_name")?,
        logical_date: NaiveDate::parse_from_str(&logical_date, "%Y-%m-%d")
            .map_err(|e| crate::error::PipelineError::Validation(e.to_string()))?,
        run_id: row.try_get("run_id")?,
        schema_version: row.try_get("schema_version")?,
        loaded_at: DateTime::parse_from_rfc3339(&loaded_at)
            .map_err(|e| crate::error::PipelineError::Validation(e.to_string()))?
            .with_timezone(&Utc),
    })
}
