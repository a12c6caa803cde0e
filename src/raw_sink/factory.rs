//! Environment-driven selection of the active `RawSink` backend.

use super::{LocalFilesystemRawSink, ObjectStoreConfig, ObjectStoreRawSink, RawSink};
use crate::error::{PipelineError, Result};
use std::sync::Arc;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Builds a `RawSink` from `PIPELINE_RAW_SINK` and its backend-specific siblings.
///
/// `PIPELINE_RAW_SINK=filesystem` (default) reads `PIPELINE_RAW_SINK_ROOT`.
/// `PIPELINE_RAW_SINK=object` reads `PIPELINE_RAW_SINK_BUCKET`, `_PREFIX`,
/// `_ENDPOINT_URL`, `_REGION`, `_ACCESS_KEY_ID`, `_SECRET_ACCESS_KEY`.
pub fn create_raw_sink() -> Result<Arc<dyn RawSink>> {
    let backend = env_var("PIPELINE_RAW_SINK").unwrap_or_else(|| "filesystem".to_string());
    match backend.as_str() {
        "filesystem" => {
            let root = env_var("PIPELINE_RAW_SINK_ROOT").unwrap_or_else(|| "data/raw".to_string());
            Ok(Arc::new(LocalFilesystemRawSink::new(root)))
        }
        "object" => {
            let bucket = env_var("PIPELINE_RAW_SINK_BUCKET").ok_or_else(|| {
                PipelineError::Config("PIPELINE_RAW_SINK_BUCKET is required for object backend".into())
            })?;
            let prefix = env_var("PIPELINE_RAW_SINK_PREFIX").unwrap_or_else(|| "raw".to_string());
            let config = ObjectStoreConfig {
                bucket,
                prefix,
                endpoint_url: env_var("PIPELINE_RAW_SINK_ENDPOINT_URL"),
                region: env_var("PIPELINE_RAW_SINK_REGION"),
                access_key: env_var("PIPELINE_RAW_SINK_ACCESS_KEY_ID"),
                secret_key: env_var("PIPELINE_RAW_SINK_SECRET_ACCESS_KEY"),
            };
            Ok(Arc::new(ObjectStoreRawSink::new(config)?))
        }
        other => Err(PipelineError::Config(format!(
            "unknown PIPELINE_RAW_SINK backend '{other}' (expected 'filesystem' or 'object')"
        ))),
    }
}
