//! Partition identity: the `PartitionKey` primary key and `RunId` minting.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a logical partition: `(source, customer_id, query_name, logical_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub source: String,
    pub customer_id: String,
    pub query_name: String,
    pub logical_date: NaiveDate,
}

impl PartitionKey {
    pub fn new(
        source: impl Into<String>,
        customer_id: impl Into<String>,
        query_name: impl Into<String>,
        logical_date: NaiveDate,
    ) -> Self {
        Self {
            source: source.into(),
            customer_id: customer_id.into(),
            query_name: query_name.into(),
            logical_date,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/customer_id={}/query_name={}/logical_date={}",
            self.source, self.customer_id, self.query_name, self.logical_date
        )
    }
}

/// A run identifier: a millisecond-precision UTC timestamp with trailing `Z`.
///
/// Run IDs must remain lexicographically sortable in chronological order; this is
/// the authority tie-breaker in the validator (see `validator.rs`). Do not swap this
/// minter for a UUID generator, that would break the ordering guarantee.
pub fn mint_run_id() -> String {
    Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_lexicographically_ordered_with_time() {
        let a = mint_run_id();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = mint_run_id();
        assert!(a <= b);
    }

    #[test]
    fn run_id_has_millisecond_precision_and_trailing_z() {
        let id = mint_run_id();
        assert!(id.ends_with('Z'));
        assert_eq!(id.len(), "2024-06-01T12:34:56.789Z".len());
    }

    #[test]
    fn partition_key_display_uses_canonical_tokens() {
        let key = PartitionKey::new(
            "google_ads",
            "1234567890",
            "campaign_stats",
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
        );
        assert_eq!(
            key.to_string(),
            "google_ads/customer_id=1234567890/query_name=campaign_stats/logical_date=2024-06-10"
        );
    }
}
