//! Upstream report API abstraction the Extractor drives.

use crate::config::QueryDefinition;
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

/// One row as returned by the upstream API, before flattening. Mirrors the
/// nested-field shape a GAQL-style streaming response would hand back.
pub type ReportRow = Value;

/// Streams rows for a `(query, customer_id, date range)` from the upstream report API.
#[async_trait]
pub trait ReportClient: Send + Sync {
    async fn stream_rows(
        &self,
        query: &QueryDefinition,
        customer_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ReportRow>>;
}

/// In-memory stand-in used by tests and local development.
#[derive(Default)]
pub struct MockReportClient {
    rows: Vec<ReportRow>,
}

impl MockReportClient {
    pub fn new(rows: Vec<ReportRow>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl ReportClient for MockReportClient {
    async fn stream_rows(
        &self,
        _query: &QueryDefinition,
        _customer_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<ReportRow>> {
        Ok(self.rows.clone())
    }
}
