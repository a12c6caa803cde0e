//! Typed configuration loader: YAML file + environment variable overlay.

use crate::error::{PipelineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

static DIGITS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub name: String,
    pub entity: String,
    pub date_column: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub api_version: String,
    pub customer_ids: Vec<String>,
    pub queries: Vec<QueryDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_timezone")]
    pub dataset_timezone: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days_daily: i64,
    #[serde(default = "default_catch_up_days")]
    pub catch_up_window_days: i64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_lookback_days() -> i64 {
    2
}

fn default_catch_up_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub metadata: MetadataConfig,
    pub source: SourceConfig,
}

impl PipelineConfig {
    pub fn get_query(&self, name: &str) -> Result<&QueryDefinition> {
        self.source
            .queries
            .iter()
            .find(|q| q.name == name)
            .ok_or_else(|| {
                PipelineError::Config(format!("query definition '{name}' not found"))
            })
    }

    fn validate(&self) -> Result<()> {
        if self.source.name.trim().is_empty() {
            return Err(PipelineError::Config("source.name must not be empty".into()));
        }
        for cid in &self.source.customer_ids {
            if !DIGITS_ONLY.is_match(cid) {
                return Err(PipelineError::Config(format!(
                    "customer_id '{cid}' must contain digits only"
                )));
            }
        }
        if self.source.queries.is_empty() {
            return Err(PipelineError::Config(
                "source.queries must declare at least one query".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for query in &self.source.queries {
            if query.fields.is_empty() {
                return Err(PipelineError::Config(format!(
                    "query '{}' must declare at least one field",
                    query.name
                )));
            }
            if !seen.insert(query.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "query name '{}' is declared more than once",
                    query.name
                )));
            }
        }
        if self.metadata.lookback_days_daily < 0 {
            return Err(PipelineError::Config(
                "metadata.lookback_days_daily must be non-negative".into(),
            ));
        }
        if self.metadata.catch_up_window_days < 0 {
            return Err(PipelineError::Config(
                "metadata.catch_up_window_days must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_path(path: impl AsRef<Path>) -> Result<PipelineConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("configuration file not found: {} ({e})", path.display()))
        })?;
        let config: PipelineConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<PipelineConfig> {
        Self::load_path(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        std::env::var("PIPELINE_CONFIG_PATH")
            .unwrap_or_else(|_| "config/pipeline.yaml".to_string())
            .into()
    }
}
