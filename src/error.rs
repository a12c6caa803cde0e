use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("partition already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("partition not found: {0}")]
    NotFound(String),

    #[error("operator guard: {0}")]
    OperatorGuard(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sql error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
